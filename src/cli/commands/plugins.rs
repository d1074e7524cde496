//! Loading QML module type information from the command line.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;

use crate::cli::PluginsAction;
use crate::config::Settings;
use crate::paths::{absolute_from, clean_path};
use crate::plugins::{LibraryInfo, PluginDumper, QmltypesParser};

fn wait_for(dumper: &mut PluginDumper, timeout: Duration) {
    dumper.wait(timeout);
    if dumper.running_dumps() > 0 {
        eprintln!("Gave up waiting for {} helper run(s)", dumper.running_dumps());
    }
}

fn print_info(library: &Path, info: &LibraryInfo) {
    println!("{} [{:?}]", library.display(), info.status);
    for object in &info.objects {
        match &object.prototype {
            Some(prototype) => println!("  {} : {prototype}", object.name),
            None => println!("  {}", object.name),
        }
    }
    for api in &info.module_apis {
        println!("  api {} {}", api.uri, api.version);
    }
    if let Some(message) = &info.message {
        println!("\n{message}");
    }
}

pub fn run(action: PluginsAction, settings: &Settings) -> anyhow::Result<()> {
    let mut dumper = PluginDumper::new(&settings.plugins, Arc::new(QmltypesParser));
    let cwd = std::env::current_dir()?;

    match action {
        PluginsAction::Load {
            library,
            uri,
            version,
            import_path,
            timeout,
            json,
        } => {
            let library = clean_path(&absolute_from(&cwd, &library));
            let import_path = import_path
                .map(|p| clean_path(&absolute_from(&cwd, &p)))
                .or_else(|| library.parent().map(Path::to_path_buf))
                .unwrap_or_default();
            dumper.load_plugin_types(&library, &import_path.to_string_lossy(), &uri, &version);
            wait_for(&mut dumper, Duration::from_secs(timeout));

            let info = dumper
                .library_info(&library)
                .ok_or_else(|| anyhow!("{} was not registered", library.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(info)?);
            } else {
                print_info(&library, info);
            }
        }
        PluginsAction::Builtins { imports, timeout } => {
            if settings.plugins.qmldump_path.is_none() {
                return Err(anyhow!("plugins.qmldump_path is not configured"));
            }
            let imports = clean_path(&absolute_from(&cwd, &imports));
            dumper.load_builtin_types(&imports, true);
            wait_for(&mut dumper, Duration::from_secs(timeout));
            if let Some(info) = dumper.library_info(&imports) {
                print_info(&imports, info);
            }
        }
    }
    Ok(())
}
