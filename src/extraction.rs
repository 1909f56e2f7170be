use std::fs::{self, create_dir_all, File};
use std::io::{BufReader, BufWriter, Read};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
  Zip,
  TarGz,
  TarXz,
  TarBz2,
  Dmg,
  Exe,
  Unknown,
}

impl ArchiveFormat {
  pub fn as_str(&self) -> &'static str {
    match self {
      ArchiveFormat::Zip => "zip",
      ArchiveFormat::TarGz => "tar.gz",
      ArchiveFormat::TarXz => "tar.xz",
      ArchiveFormat::TarBz2 => "tar.bz2",
      ArchiveFormat::Dmg => "dmg",
      ArchiveFormat::Exe => "exe",
      ArchiveFormat::Unknown => "unknown",
    }
  }
}

/// Sniffs the magic bytes, falling back to the file name. DMG is decided by
/// extension first since its header is not at the start of the file.
pub fn detect_file_format(
  file_path: &Path,
) -> Result<ArchiveFormat, Box<dyn std::error::Error + Send + Sync>> {
  let name = file_path
    .file_name()
    .and_then(|n| n.to_str())
    .unwrap_or("")
    .to_lowercase();

  if name.ends_with(".dmg") {
    return Ok(ArchiveFormat::Dmg);
  }

  let mut header = [0u8; 6];
  let read = File::open(file_path)?.read(&mut header)?;
  let header = &header[..read];

  let sniffed = if header.starts_with(&[0x50, 0x4B, 0x03, 0x04])
    || header.starts_with(&[0x50, 0x4B, 0x05, 0x06])
  {
    Some(ArchiveFormat::Zip)
  } else if header.starts_with(&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00]) {
    Some(ArchiveFormat::TarXz)
  } else if header.starts_with(&[0x42, 0x5A, 0x68]) {
    Some(ArchiveFormat::TarBz2)
  } else if header.starts_with(&[0x1F, 0x8B]) {
    Some(ArchiveFormat::TarGz)
  } else if header.starts_with(&[0x4D, 0x5A]) {
    Some(ArchiveFormat::Exe)
  } else {
    None
  };

  if let Some(format) = sniffed {
    return Ok(format);
  }

  Ok(if name.ends_with(".zip") {
    ArchiveFormat::Zip
  } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
    ArchiveFormat::TarGz
  } else if name.ends_with(".tar.xz") {
    ArchiveFormat::TarXz
  } else if name.ends_with(".tar.bz2") {
    ArchiveFormat::TarBz2
  } else if name.ends_with(".exe") {
    ArchiveFormat::Exe
  } else {
    ArchiveFormat::Unknown
  })
}

/// Unpacks `archive_path` into `dest_dir`. Blocking; call from
/// `spawn_blocking`. Returns the detected format.
pub fn extract_archive(
  archive_path: &Path,
  dest_dir: &Path,
) -> Result<ArchiveFormat, Box<dyn std::error::Error + Send + Sync>> {
  create_dir_all(dest_dir)?;
  let format = detect_file_format(archive_path)?;
  log::info!(
    "Extracting {} ({}) into {}",
    archive_path.display(),
    format.as_str(),
    dest_dir.display()
  );

  match format {
    ArchiveFormat::Zip => {
      let mut archive = zip::ZipArchive::new(BufReader::new(File::open(archive_path)?))?;
      archive.extract(dest_dir)?;
    }
    ArchiveFormat::TarGz => {
      let decoder = flate2::read::GzDecoder::new(BufReader::new(File::open(archive_path)?));
      tar::Archive::new(decoder).unpack(dest_dir)?;
    }
    ArchiveFormat::TarBz2 => {
      let decoder = bzip2::read::BzDecoder::new(BufReader::new(File::open(archive_path)?));
      tar::Archive::new(decoder).unpack(dest_dir)?;
    }
    ArchiveFormat::TarXz => {
      // lzma-rs has no streaming reader; decompress to a sibling temp file first
      let scratch = tempfile::NamedTempFile::new_in(dest_dir)?;
      {
        let mut input = BufReader::new(File::open(archive_path)?);
        let mut output = BufWriter::new(scratch.as_file());
        lzma_rs::xz_decompress(&mut input, &mut output)
          .map_err(|e| format!("Failed to decompress xz stream: {e:?}"))?;
      }
      tar::Archive::new(BufReader::new(File::open(scratch.path())?)).unpack(dest_dir)?;
    }
    ArchiveFormat::Dmg => extract_dmg(archive_path, dest_dir)?,
    ArchiveFormat::Exe => {
      // Installers and portable builds are kept as downloaded
      let file_name = archive_path
        .file_name()
        .ok_or("Downloaded installer has no file name")?;
      let target = dest_dir.join(file_name);
      if target != archive_path {
        fs::copy(archive_path, target)?;
      }
    }
    ArchiveFormat::Unknown => {
      return Err(
        format!(
          "Unsupported archive format: {}. The downloaded file might be corrupted.",
          archive_path.display()
        )
        .into(),
      )
    }
  }

  Ok(format)
}

#[cfg(target_os = "macos")]
fn extract_dmg(
  dmg_path: &Path,
  dest_dir: &Path,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
  use std::process::Command;

  let mount_point = std::env::temp_dir().join(format!("donut-profiles-dmg-{}", uuid::Uuid::new_v4()));
  create_dir_all(&mount_point)?;

  let attach = Command::new("hdiutil")
    .arg("attach")
    .arg("-nobrowse")
    .arg("-readonly")
    .arg("-mountpoint")
    .arg(&mount_point)
    .arg(dmg_path)
    .output()?;
  if !attach.status.success() {
    return Err(
      format!(
        "Failed to mount DMG: {}",
        String::from_utf8_lossy(&attach.stderr)
      )
      .into(),
    );
  }

  let copy_result = (|| -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = fs::read_dir(&mount_point)?
      .filter_map(Result::ok)
      .find(|entry| entry.path().extension().is_some_and(|ext| ext == "app"))
      .ok_or("No .app bundle found in DMG")?;
    let status = Command::new("ditto")
      .arg(app.path())
      .arg(dest_dir.join(app.file_name()))
      .status()?;
    if !status.success() {
      return Err("Failed to copy app bundle out of DMG".into());
    }
    Ok(())
  })();

  let _ = Command::new("hdiutil")
    .arg("detach")
    .arg(&mount_point)
    .arg("-force")
    .output();
  let _ = fs::remove_dir(&mount_point);

  copy_result
}

#[cfg(not(target_os = "macos"))]
fn extract_dmg(
  _dmg_path: &Path,
  _dest_dir: &Path,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
  Err("DMG extraction is only supported on macOS".into())
}

/// Marks `path` executable for its owner, group and others.
#[cfg(unix)]
pub fn set_executable_permissions(path: &Path) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
  use std::os::unix::fs::PermissionsExt;

  let mut permissions = path.metadata()?.permissions();
  permissions.set_mode(permissions.mode() | 0o111);
  fs::set_permissions(path, permissions)?;
  Ok(())
}

#[cfg(not(unix))]
pub fn set_executable_permissions(_path: &Path) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
  Ok(())
}
