//! Command dispatch: CLI args -> fleet command -> fleet run -> output.

pub mod util;

use std::io::IsTerminal;

use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fleetspell_config::{ConfigPaths, ControllerFilter};
use fleetspell_core::command::{
    Acl, AddUser, DisableUser, EnableUser, Grant, Ping, RemoveUser, ShowController, Status,
    UpdatePackages,
};
use fleetspell_core::{ConnectManager, ControllerConfig, FleetCommand, FleetRunner, RunMode, RunOptions};

use crate::cli::{AclArg, Command, GlobalOpts, OutputFormat, RunType};
use crate::error::CliError;
use crate::output;

/// Run a fleet command across the selected controllers and print results.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    let paths = config_paths(global);
    let is_add_user = matches!(cmd, Command::AddUser(_));
    let controllers = select_controllers(&paths, &global.filter)?;
    let command = build_command(cmd, global)?;

    if command.is_write() && !global.dry_run {
        let names: Vec<&str> = controllers.iter().map(|c| c.name.as_str()).collect();
        let prompt = format!(
            "Run {} on {} controller(s): {}?",
            command.name(),
            names.len(),
            names.join(", ")
        );
        if !util::confirm(&prompt, command.name(), global.yes)? {
            info!(command = command.name(), "aborted by user");
            return Ok(());
        }
    }

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let manager = ConnectManager::http();
    let options = run_options(global);
    debug!(command = command.name(), ?options, "dispatching fleet run");
    let outcome = FleetRunner::new(&manager)
        .with_cancellation(cancel)
        .run(&controllers, command.as_ref(), &options)
        .await;
    interrupt.abort();
    let results = outcome?;

    let rendered = if is_add_user && !global.dry_run && global.output == OutputFormat::Table {
        output::render_personal_snippet(&results, &paths.personal)?
    } else {
        output::render_results(global.output, &results, output::should_color(global.color))?
    };
    output::print_output(&rendered, global.quiet);

    let failed = results.iter().filter(|entry| !entry.result.success).count();
    if failed > 0 {
        return Err(CliError::ControllersFailed {
            failed,
            total: results.len(),
        });
    }
    Ok(())
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupt received, stopping");
        cancel.cancel();
    }
}

fn config_paths(global: &GlobalOpts) -> ConfigPaths {
    let defaults = ConfigPaths::from_env();
    ConfigPaths {
        global: global.config.clone().unwrap_or(defaults.global),
        personal: global.personal_config.clone().unwrap_or(defaults.personal),
    }
}

fn select_controllers(paths: &ConfigPaths, filter: &str) -> Result<Vec<ControllerConfig>, CliError> {
    let config = fleetspell_config::load(paths)?;
    let filter: ControllerFilter = filter.parse()?;
    let controllers = config.filtered(&filter)?;
    info!(
        selected = controllers.len(),
        configured = config.controllers.len(),
        %filter,
        "controllers selected"
    );
    Ok(controllers)
}

fn run_options(global: &GlobalOpts) -> RunOptions {
    let mode = match global.run_type {
        RunType::Serial => RunMode::Serial,
        RunType::Parallel => RunMode::Parallel {
            limit: global.limit,
        },
        RunType::Batch => RunMode::Batch {
            size: global.batch_size,
        },
    };
    RunOptions {
        mode,
        dry_run: global.dry_run,
        force_reconnect: global.force_reconnect,
    }
}

fn build_command(cmd: Command, global: &GlobalOpts) -> Result<Box<dyn FleetCommand>, CliError> {
    Ok(match cmd {
        Command::Ping => Box::new(Ping),
        Command::ShowController => Box::new(ShowController),
        Command::Status(args) => Box::new(Status {
            models: args.models,
        }),
        Command::AddUser(args) => {
            let password = match args.password {
                Some(password) => Some(SecretString::from(password)),
                None if !global.yes && !global.dry_run && std::io::stdin().is_terminal() => {
                    Some(util::prompt_password()?)
                }
                None => None,
            };
            Box::new(AddUser {
                user: args.user,
                display_name: args.display_name,
                password,
            })
        }
        Command::RemoveUser(args) => Box::new(RemoveUser { user: args.user }),
        Command::EnableUser(args) => Box::new(EnableUser { user: args.user }),
        Command::DisableUser(args) => Box::new(DisableUser { user: args.user }),
        Command::Grant(args) => Box::new(Grant {
            user: args.user,
            acl: acl(args.acl),
        }),
        Command::UpdatePackages(args) => {
            let patch = util::read_patch_file(&args.patch)?;
            Box::new(UpdatePackages::new(patch, args.models.models)?)
        }
        Command::Completions(_) => {
            return Err(CliError::Run {
                message: "completions are not a fleet command".into(),
            });
        }
    })
}

fn acl(arg: AclArg) -> Acl {
    match arg {
        AclArg::Login => Acl::Login,
        AclArg::AddModel => Acl::AddModel,
        AclArg::Superuser => Acl::Superuser,
    }
}
