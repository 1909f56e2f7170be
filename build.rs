fn main() {
  // Inject build version based on environment variables set by CI
  if let Ok(build_tag) = std::env::var("BUILD_TAG") {
    println!("cargo:rustc-env=BUILD_VERSION={build_tag}");
  } else if let Ok(tag_name) = std::env::var("GITHUB_REF_NAME") {
    println!("cargo:rustc-env=BUILD_VERSION={tag_name}");
  } else if let Ok(commit_hash) = std::env::var("GITHUB_SHA") {
    let short_hash = &commit_hash[0..7.min(commit_hash.len())];
    println!("cargo:rustc-env=BUILD_VERSION=nightly-{short_hash}");
  } else {
    let version = std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.1.0".to_string());
    println!("cargo:rustc-env=BUILD_VERSION=dev-{version}");
  }

  println!("cargo:rerun-if-env-changed=BUILD_TAG");
  println!("cargo:rerun-if-env-changed=GITHUB_REF_NAME");
  println!("cargo:rerun-if-env-changed=GITHUB_SHA");
}
