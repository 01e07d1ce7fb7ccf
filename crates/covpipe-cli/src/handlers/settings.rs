//! Settings command handler

use super::load_settings;
use crate::commands::{SettingsAction, SettingsArgs};
use crate::config::CliConfig;
use crate::error::CliResult;
use crate::output::ProgressReporter;
use covpipe::{GlobalSettings, MandatoryExclusionSet, ToolInstallation, ToolKind};

/// Execute the settings command
pub fn execute_settings(config: &CliConfig, args: &SettingsArgs) -> CliResult<()> {
    let (store, mut settings) = load_settings(config)?;

    if matches!(args.action, SettingsAction::Show) {
        println!("# {}", store.path().display());
        print!("{}", serde_yaml_ng::to_string(&settings)?);
        return Ok(());
    }

    let message = apply_settings_action(&mut settings, &args.action);
    store.save(&settings)?;

    let reporter = ProgressReporter::new(config.color.should_color(), config.verbosity.is_quiet());
    reporter.success(&format!("{message} ({})", store.path().display()));
    Ok(())
}

/// Apply a mutating action and describe what changed
pub fn apply_settings_action(settings: &mut GlobalSettings, action: &SettingsAction) -> String {
    match action {
        SettingsAction::Show => "Nothing changed".to_string(),
        SettingsAction::SetExcludes { masks } => {
            let masks = masks.trim();
            if masks.is_empty() {
                settings.mandatory_excluded_assemblies = MandatoryExclusionSet::default();
                "Cleared mandatory excluded assemblies".to_string()
            } else {
                settings.mandatory_excluded_assemblies =
                    MandatoryExclusionSet::new(Some(masks.to_string()));
                format!("Mandatory excluded assemblies set to '{masks}'")
            }
        }
        SettingsAction::SetTool { kind, home, name } => {
            let kind: ToolKind = (*kind).into();
            settings.set_installation(kind, ToolInstallation::new(name.clone(), home.clone()));
            format!("{kind} installation '{name}' set to '{home}'")
        }
    }
}
