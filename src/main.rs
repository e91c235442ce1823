use castradio::{
    ArgParse,
    config, server
};

use arg::{Args, ParseError, ParseKind};

use tracing::error;

fn parse_args() -> ArgParse {
    let raw: Vec<String> = std::env::args().skip(1).collect();
    let raw: Vec<&str>   = raw.iter().map(String::as_str).collect();

    match ArgParse::from_args(raw) {
        Ok(v) => v,
        Err(ParseKind::Top(ParseError::HelpRequested(help))) => {
            eprintln!("{}", help);
            std::process::exit(0);
        },
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    }
}

#[tokio::main]
async fn main() {
    let args = parse_args();

    let level = if args.debug { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt().with_thread_names(true).with_max_level(level).init();

    if args.gen {
        let path = args.config_file.as_deref().unwrap_or("castradio.json");
        config::Settings::create_default(path);
        std::process::exit(0);
    }

    let mut config = match args.config_file.as_deref() {
        Some(path) => config::Settings::load(path),
        None => config::Settings::default()
    };
    config.merge_args(&args);

    {
        let e = config.verify();
        if e > 0 {
            error!("{} errors found in configuration, exiting...", e);
            std::process::exit(1);
        }
    }

    if let Err(e) = server::listener(config).await {
        error!("{}", e);
        std::process::exit(1);
    }
}
