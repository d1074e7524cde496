//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// qmake project tree tool
#[derive(Parser)]
#[command(
    name = "qmaketree",
    version = env!("CARGO_PKG_VERSION"),
    about = "Evaluate, watch and edit qmake project trees",
    next_line_help = true,
    styles = clap_cargo_style()
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Set up .qmaketree directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    #[command(about = "Display active settings")]
    Config,

    #[command(
        about = "Load a project and print its node tree",
        after_help = "Examples:\n  qmaketree tree app.pro\n  qmaketree tree src/src.pro"
    )]
    Tree {
        /// Top-level .pro file
        pro_file: PathBuf,
    },

    #[command(about = "Show type, parse state and targets of every .pro unit")]
    Info {
        pro_file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    #[command(about = "Show the extracted variables of a .pro unit")]
    Vars {
        pro_file: PathBuf,

        /// Sub-project to show instead of the root
        #[arg(short, long, value_name = "PRO")]
        unit: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },

    #[command(
        about = "Edit build files",
        after_help = "Examples:\n  qmaketree edit app.pro add main.cpp widget.ui\n  qmaketree edit app.pro rename old.cpp new.cpp\n  qmaketree edit app.pro set-var TARGET demo"
    )]
    Edit {
        pro_file: PathBuf,

        #[command(subcommand)]
        action: EditAction,
    },

    #[command(about = "Load a project and keep it in sync with the filesystem")]
    Watch {
        pro_file: PathBuf,

        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
    },

    #[command(about = "Load type information of QML modules with native plugins")]
    Plugins {
        #[command(subcommand)]
        action: PluginsAction,
    },
}

#[derive(Subcommand)]
pub enum EditAction {
    #[command(about = "Add files to the unit that should own them")]
    Add {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// .pro or .pri file to edit (defaults to the closest unit)
        #[arg(long, value_name = "FILE")]
        to: Option<PathBuf>,
    },

    #[command(about = "Remove files from a unit")]
    Remove {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[arg(long, value_name = "FILE")]
        from: Option<PathBuf>,

        /// Also delete the files from disk
        #[arg(long)]
        delete: bool,
    },

    #[command(about = "Rename a file in the build files that list it")]
    Rename { old: PathBuf, new: PathBuf },

    #[command(name = "add-subdir", about = "Add sub-projects to a SUBDIRS project")]
    AddSubdir {
        #[arg(required = true)]
        pro_files: Vec<PathBuf>,

        #[arg(long, value_name = "FILE")]
        to: Option<PathBuf>,
    },

    #[command(name = "remove-subdir", about = "Remove sub-projects from a SUBDIRS project")]
    RemoveSubdir {
        #[arg(required = true)]
        pro_files: Vec<PathBuf>,

        #[arg(long, value_name = "FILE")]
        from: Option<PathBuf>,
    },

    #[command(name = "set-var", about = "Replace the value of a variable")]
    SetVar {
        variable: String,
        value: String,

        #[arg(long, value_name = "FILE")]
        r#in: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum PluginsAction {
    #[command(
        about = "Load type information for one module directory",
        after_help = "Examples:\n  qmaketree plugins load /opt/qml/Shapes --uri Shapes --version 1.0"
    )]
    Load {
        /// Directory containing the qmldir file
        library: PathBuf,

        #[arg(long)]
        uri: String,

        #[arg(long, default_value = "1.0")]
        version: String,

        /// Import path the module was found under
        #[arg(long)]
        import_path: Option<PathBuf>,

        /// Seconds to wait for a running helper
        #[arg(long, default_value = "30")]
        timeout: u64,

        #[arg(long)]
        json: bool,
    },

    #[command(about = "Dump the builtin modules under a Qt imports directory")]
    Builtins {
        imports: PathBuf,

        #[arg(long, default_value = "60")]
        timeout: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_edit_add() {
        let cli = Cli::try_parse_from(["qmaketree", "edit", "app.pro", "add", "a.cpp", "b.h"])
            .expect("parse");
        match cli.command {
            Commands::Edit {
                action: EditAction::Add { files, to },
                ..
            } => {
                assert_eq!(files.len(), 2);
                assert!(to.is_none());
            }
            _ => panic!("expected edit add"),
        }
    }
}
