use clap::Parser;
use fundplan::api::{App, Command, build_inputs, render_projection, run_http_server};
use fundplan::core::run_projection;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    match App::parse().command {
        Command::Serve { port } => {
            if let Err(e) = run_http_server(port).await {
                eprintln!("Server error: {e}");
                std::process::exit(1);
            }
        }
        Command::Project { cli, pretty } => {
            let inputs = match build_inputs(cli) {
                Ok(inputs) => inputs,
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(2);
                }
            };
            let result = run_projection(&inputs);
            match render_projection(&result, pretty) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Failed to serialize projection: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}
