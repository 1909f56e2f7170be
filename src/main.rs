use clap::{Arg, Command};
use donut_profiles_lib::events::{self, BroadcastEmitter, RecordingEmitter};
use donut_profiles_lib::{api_server, commands, version_updater::VersionUpdater};
use std::process;
use std::sync::Arc;

fn cli() -> Command {
  Command::new("donut-profiles")
    .version(env!("BUILD_VERSION"))
    .about("Headless backend for a multi-browser profile manager")
    .subcommand_required(true)
    .subcommand(
      Command::new("serve")
        .about("Run the HTTP and WebSocket API")
        .arg(
          Arg::new("port")
            .short('p')
            .long("port")
            .value_parser(clap::value_parser!(u16))
            .help("Port to listen on (defaults to the api_port setting)"),
        ),
    )
    .subcommand(
      Command::new("invoke")
        .about("Run a single command and print its JSON result")
        .arg(Arg::new("command").required(true).help("Command name"))
        .arg(
          Arg::new("args")
            .help("JSON object of camelCase arguments")
            .default_value("{}"),
        ),
    )
    .subcommand(Command::new("commands").about("List every command name"))
}

async fn serve(port: Option<u16>) -> Result<(), String> {
  let (emitter, _rx) = BroadcastEmitter::with_capacity(256);
  let emitter = Arc::new(emitter);
  events::set_global_emitter(emitter.clone())?;

  let actual_port = api_server::start_api_server(port, Some(emitter)).await?;
  println!("Listening on http://127.0.0.1:{actual_port}");

  tokio::spawn(VersionUpdater::instance().run_background_task());

  tokio::signal::ctrl_c()
    .await
    .map_err(|e| format!("Failed to wait for shutdown signal: {e}"))?;
  log::info!("Shutting down");
  api_server::stop_api_server().await
}

async fn invoke(command: &str, raw_args: &str) -> Result<(), String> {
  let args: serde_json::Value =
    serde_json::from_str(raw_args).map_err(|e| format!("Arguments are not valid JSON: {e}"))?;

  let recorder = RecordingEmitter::new();
  events::set_global_emitter(Arc::new(recorder.clone()))?;

  let result = commands::invoke(command, args).await?;
  for (event, payload) in recorder.events() {
    eprintln!("event {event}: {payload}");
  }

  let output =
    serde_json::to_string_pretty(&result).map_err(|e| format!("Failed to format result: {e}"))?;
  println!("{output}");
  Ok(())
}

#[tokio::main]
async fn main() {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
    .format_timestamp_millis()
    .init();

  let matches = cli().get_matches();

  let result = match matches.subcommand() {
    Some(("serve", serve_matches)) => serve(serve_matches.get_one::<u16>("port").copied()).await,
    Some(("invoke", invoke_matches)) => {
      let command = invoke_matches
        .get_one::<String>("command")
        .map(String::as_str)
        .unwrap_or_default();
      let args = invoke_matches
        .get_one::<String>("args")
        .map(String::as_str)
        .unwrap_or("{}");
      invoke(command, args).await
    }
    Some(("commands", _)) => {
      for command in commands::list_commands() {
        println!("{command}");
      }
      Ok(())
    }
    _ => Err("No subcommand given".to_string()),
  };

  if let Err(e) = result {
    eprintln!("Error: {e}");
    process::exit(1);
  }
}
