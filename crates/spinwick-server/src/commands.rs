use std::sync::Arc;

use clap::{Parser, Subcommand};
use spinwick_core::{parse_env_arg, split_comma_separated, EnvVar, EnvVarMap, SpinwickKind};
use spinwick_github::events::IssueCommentEvent;
use tracing::{error, info};

use crate::server::Server;

const SLASH_COMMAND_SPINWICK: &str = "/spinwick";

#[derive(Debug, Parser)]
#[command(name = "spinwick", disable_help_subcommand = true)]
struct SpinwickCli {
    #[command(subcommand)]
    command: SpinwickSubcommand,
}

#[derive(Debug, Subcommand)]
enum SpinwickSubcommand {
    /// Create a new SpinWick test server
    Create {
        /// Optional comma-separated environment variables, e.g. VAR1=VAL1,VAR2=VAL2
        #[arg(long)]
        env: Option<String>,
        /// Size of the installation, e.g. 'miniSingleton' or 'miniHA'
        #[arg(long, default_value = "miniSingleton")]
        size: String,
    },
    /// Update the existing SpinWick test server
    Update {
        /// Optional comma-separated environment variables, e.g. VAR1=VAL1,VAR2=VAL2
        #[arg(long)]
        env: Option<String>,
        /// Optional comma-separated environment variable names to clear, e.g. VAR1,VAR2
        #[arg(long)]
        clear_env: Option<String>,
    },
    /// Delete the existing SpinWick test server
    Delete,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SpinwickCommand {
    Create { env: EnvVarMap, size: String },
    Update { env: EnvVarMap },
    Delete,
}

/// Parses the argument vector of a `/spinwick` comment. The error string is
/// the text to post back on the PR: clap's usage output for unknown
/// flags/subcommands, or the env-var parse failure.
pub fn parse_spinwick_command(args: &[String]) -> Result<SpinwickCommand, String> {
    let mut argv = Vec::with_capacity(args.len() + 1);
    argv.push("spinwick".to_owned());
    argv.extend(args.iter().cloned());

    let cli = SpinwickCli::try_parse_from(&argv).map_err(|err| err.to_string())?;
    match cli.command {
        SpinwickSubcommand::Create { env, size } => Ok(SpinwickCommand::Create {
            env: parse_env_map(env.as_deref())?,
            size,
        }),
        SpinwickSubcommand::Update { env, clear_env } => {
            let mut env = parse_env_map(env.as_deref())?;
            if let Some(keys) = clear_env {
                for key in split_comma_separated(&keys) {
                    env.insert(key, EnvVar::clear());
                }
            }
            Ok(SpinwickCommand::Update { env })
        }
        SpinwickSubcommand::Delete => Ok(SpinwickCommand::Delete),
    }
}

fn parse_env_map(raw: Option<&str>) -> Result<EnvVarMap, String> {
    match raw {
        None | Some("") => Ok(EnvVarMap::new()),
        Some(raw) => parse_env_arg(raw).map_err(|err| format!("failed to parse env vars: {err}")),
    }
}

impl Server {
    pub async fn handle_slash_command(self: Arc<Self>, event: IssueCommentEvent) {
        let body = event.comment.body.trim().to_owned();
        info!(cmd = %body, "handling slash command");

        if !self.config.disable_permission_check {
            let org = if self.config.org.is_empty() {
                event.repository.owner.login.clone()
            } else {
                self.config.org.clone()
            };
            match self.github.is_org_member(&org, &event.sender.login).await {
                Ok(true) => {}
                Ok(false) => {
                    error!(user = %event.sender.login, org = %org, "user has no permission to run slash commands");
                    return;
                }
                Err(err) => {
                    error!(error = %err, "failed to check org membership");
                    return;
                }
            }
        }

        let mut words = body.split_whitespace();
        let Some(command) = words.next() else {
            return;
        };
        if command != SLASH_COMMAND_SPINWICK {
            error!(cmd = %body, "invalid slash command");
            return;
        }
        let args: Vec<String> = words.map(str::to_owned).collect();

        let pr = match self
            .github
            .get_pull_request(
                &event.repository.owner.login,
                &event.repository.name,
                event.issue.number,
            )
            .await
        {
            Ok(pr) => pr,
            Err(err) => {
                error!(error = %err, "failed to get PR for slash command");
                return;
            }
        };

        match parse_spinwick_command(&args) {
            Err(output) => {
                error!(cmd = %body, "failed to handle spinwick command");
                self.controller
                    .send_comment(&pr, &format!("```\n{output}\n```"))
                    .await;
            }
            Ok(SpinwickCommand::Create { env, size }) => {
                info!(?env, size = %size, "going to create spinwick");
                let spinwick = self.controller.spinwick_for(&pr);
                self.env_cache.set(&spinwick.repeatable_id, env);

                // Creation itself is driven by the labeled event this add
                // produces, keeping slash commands and labels on one path.
                let label = if size == self.config.sizes.ha {
                    self.config.labels.setup_ha.clone()
                } else {
                    self.config.labels.setup.clone()
                };
                if let Err(err) = self
                    .github
                    .add_label(&pr.repo_owner, &pr.repo_name, pr.number, &label)
                    .await
                {
                    error!(label = %label, error = %err, "error adding the label");
                }
            }
            Ok(SpinwickCommand::Update { env }) => {
                info!(?env, "going to update spinwick");
                let spinwick = self.controller.spinwick_for(&pr);
                self.env_cache.set(&spinwick.repeatable_id, env);

                let kind = self
                    .config
                    .spinwick_kind_in(&pr.labels)
                    .unwrap_or(SpinwickKind::Standard);
                self.controller.handle_update(&pr, kind).await;
            }
            Ok(SpinwickCommand::Delete) => {
                info!("going to delete spinwick");
                self.controller.strip_spinwick_labels(&pr).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|arg| (*arg).to_owned()).collect()
    }

    #[test]
    fn no_arguments_returns_usage() {
        let output = parse_spinwick_command(&[]).expect_err("missing subcommand returns usage");
        assert!(output.contains("Usage"), "unexpected output: {output}");
    }

    #[test]
    fn create_parses_env_vars_and_size() {
        let command = parse_spinwick_command(&args(&[
            "create",
            "--env",
            "VAR1=val1,VAR2=val2",
            "--size",
            "miniSingleton",
        ]))
        .unwrap();

        let SpinwickCommand::Create { env, size } = command else {
            panic!("expected a create command");
        };
        assert_eq!(size, "miniSingleton");
        assert_eq!(env.len(), 2);
        assert_eq!(env.get("VAR1"), Some(&EnvVar::set("val1")));
        assert_eq!(env.get("VAR2"), Some(&EnvVar::set("val2")));
    }

    #[test]
    fn create_defaults_the_size() {
        let command = parse_spinwick_command(&args(&["create"])).unwrap();
        assert_eq!(
            command,
            SpinwickCommand::Create {
                env: EnvVarMap::new(),
                size: "miniSingleton".to_owned(),
            }
        );
    }

    #[test]
    fn update_parses_env_vars() {
        let command = parse_spinwick_command(&args(&["update", "--env", "VAR3=val3"])).unwrap();
        let SpinwickCommand::Update { env } = command else {
            panic!("expected an update command");
        };
        assert_eq!(env.len(), 1);
        assert_eq!(env.get("VAR3"), Some(&EnvVar::set("val3")));
    }

    #[test]
    fn update_marks_cleared_variables() {
        let command = parse_spinwick_command(&args(&["update", "--clear-env", "VAR3"])).unwrap();
        let SpinwickCommand::Update { env } = command else {
            panic!("expected an update command");
        };
        assert_eq!(env.get("VAR3"), Some(&EnvVar::clear()));
    }

    #[test]
    fn delete_parses() {
        assert_eq!(
            parse_spinwick_command(&args(&["delete"])).unwrap(),
            SpinwickCommand::Delete
        );
    }

    #[test]
    fn unknown_subcommand_returns_usage() {
        let output = parse_spinwick_command(&args(&["invalid"]))
            .expect_err("unknown subcommand is rejected");
        assert!(output.contains("invalid"), "unexpected output: {output}");
    }

    #[test]
    fn unknown_flag_returns_usage() {
        let output = parse_spinwick_command(&args(&["create", "--invalid-flag"]))
            .expect_err("unknown flag is rejected");
        assert!(output.contains("--invalid-flag"), "unexpected output: {output}");
    }

    #[test]
    fn duplicate_env_keys_are_a_hard_error() {
        let output = parse_spinwick_command(&args(&["create", "--env", "VAR1=VAL1,VAR1=VAL2"]))
            .expect_err("duplicate keys are rejected");
        assert!(output.contains("duplicate key"), "unexpected output: {output}");
    }
}
