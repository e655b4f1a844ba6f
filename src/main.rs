use std::path::PathBuf;

use funny_tui::RunOptions;

const HELP: &str = "Funny TUI - Watch, vote on and share funny videos from the terminal.

  --version, -V          Show version and exit
  --help,    -h          Show this help message
  --offline              Use built-in sample videos instead of the server
  --config <path>        Read configuration from <path>
  --api-url <url>        Save the server base URL to the config file and exit";

enum Cli {
    Run(RunOptions),
    Exit,
}

fn main() {
    match parse_args(std::env::args().skip(1)) {
        Ok(Cli::Exit) => {}
        Ok(Cli::Run(opts)) => {
            if let Err(err) = funny_tui::run(opts) {
                eprintln!("error: {err:?}");
                std::process::exit(1);
            }
        }
        Err(message) => {
            eprintln!("error: {message}\n\n{HELP}");
            std::process::exit(2);
        }
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Cli, String> {
    let mut opts = RunOptions::default();
    let mut api_url = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("funny-tui {}", funny_tui::VERSION);
                return Ok(Cli::Exit);
            }
            "--help" | "-h" => {
                println!("{HELP}");
                return Ok(Cli::Exit);
            }
            "--offline" => opts.offline = true,
            "--config" => {
                let path = args.next().ok_or("--config needs a path")?;
                opts.config_file = Some(PathBuf::from(path));
            }
            "--api-url" => {
                api_url = Some(args.next().ok_or("--api-url needs a URL")?);
            }
            other => return Err(format!("unknown argument {other:?}")),
        }
    }

    if let Some(url) = api_url {
        match funny_tui::config::save_api_base_url(opts.config_file.clone(), &url) {
            Ok(path) => {
                println!("Saved api.base_url to {}", path.display());
                return Ok(Cli::Exit);
            }
            Err(err) => return Err(format!("{err:#}")),
        }
    }
    Ok(Cli::Run(opts))
}
