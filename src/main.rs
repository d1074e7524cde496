use clap::Parser;

use qmaketree::Settings;
use qmaketree::cli::{Cli, Commands, commands};

fn load_settings(cli: &Cli) -> Settings {
    let loaded = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };
    match loaded {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            eprintln!("Falling back to default settings.");
            Settings::default()
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let mut settings = load_settings(&cli);
    if cli.verbose {
        settings.logging.default = "debug".to_string();
    }
    qmaketree::logging::init_with_config(&settings.logging);

    let result = match cli.command {
        Commands::Init { force } => commands::init::run_init(force),
        Commands::Config => commands::init::run_config(&settings),
        Commands::Tree { pro_file } => commands::show::run_tree(&pro_file, &settings),
        Commands::Info { pro_file, json } => commands::show::run_info(&pro_file, json, &settings),
        Commands::Vars {
            pro_file,
            unit,
            json,
        } => commands::show::run_vars(&pro_file, unit.as_deref(), json, &settings),
        Commands::Edit { pro_file, action } => commands::edit::run(&pro_file, action, &settings),
        Commands::Watch { pro_file, seconds } => {
            commands::watch::run(&pro_file, seconds, &settings)
        }
        Commands::Plugins { action } => commands::plugins::run(action, &settings),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
