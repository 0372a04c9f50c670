use std::io::IsTerminal;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use meshtag::{Args, DiscoveryPort, OutputFormat, Transport};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let mut stdout = std::io::stdout();

    let run_result = async {
        let output_format = args.output_format().unwrap_or(if stdout.is_terminal() {
            OutputFormat::Pretty
        } else {
            OutputFormat::Json
        });
        let (command, fake_config) = args.into_command_and_fake_config();
        let (transport, discovery): (Arc<dyn Transport>, Arc<dyn DiscoveryPort>) =
            match fake_config {
                Some(config) => {
                    let fake = meshtag::fake_transport(config);
                    (Arc::clone(&fake) as _, fake as _)
                }
                None => {
                    let real = meshtag::real_transport().await?;
                    (Arc::clone(&real) as _, real as _)
                }
            };

        meshtag::run(command, &mut stdout, transport, discovery, output_format).await
    }
    .await;

    match run_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(1)
        }
    }
}
