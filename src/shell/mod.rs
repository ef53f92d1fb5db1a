//! Line-oriented administration shell.
//!
//! Two modes, in the style of network-equipment CLIs: exec mode for
//! inspection (`show rules`, `write memory`) and config mode (entered with
//! `configure terminal`) for rule edits. Lines neither mode recognizes
//! fall through to the plugin command registry, so plugins can expose
//! their own verbs without shell changes.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::firewall::{store, Firewall, Rule};
use crate::plugin::Pipeline;

const EXEC_HELP: &str = "\
Commands:
  show rules           list firewall rules
  configure terminal   enter configuration mode
  write memory         save rules to the rules file
  help                 this text
  exit                 leave the shell";

const CONFIG_HELP: &str = "\
Commands:
  rule add <allow|deny> [ip=ADDR|CIDR] [method=M] [host=H] [path=P]
  rule del <index>
  rule show <index>
  exit                 return to exec mode";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Exec,
    Config,
}

/// What the shell does with one input line.
#[derive(Debug, PartialEq, Eq)]
pub enum ShellOutcome {
    /// Print this and prompt again.
    Reply(String),
    /// Prompt again with no output.
    Silent,
    /// Leave the shell.
    Exit,
}

/// The shell itself. It drives the firewall admin API and rules
/// persistence directly; everything else goes through the pipeline's
/// command registry.
pub struct AdminShell {
    firewall: Firewall,
    pipeline: Arc<Pipeline>,
    rules_file: PathBuf,
    mode: Mode,
}

impl AdminShell {
    pub fn new(firewall: Firewall, pipeline: Arc<Pipeline>, rules_file: impl Into<PathBuf>) -> Self {
        Self {
            firewall,
            pipeline,
            rules_file: rules_file.into(),
            mode: Mode::Exec,
        }
    }

    pub fn prompt(&self) -> &'static str {
        match self.mode {
            Mode::Exec => "palisade# ",
            Mode::Config => "palisade(config)# ",
        }
    }

    /// Interpret one input line in the current mode.
    pub fn handle_line(&mut self, line: &str) -> ShellOutcome {
        let line = line.trim();
        if line.is_empty() {
            return ShellOutcome::Silent;
        }
        match self.mode {
            Mode::Exec => self.handle_exec(line),
            Mode::Config => self.handle_config(line),
        }
    }

    fn handle_exec(&mut self, line: &str) -> ShellOutcome {
        match line {
            "exit" | "quit" => ShellOutcome::Exit,
            "help" => ShellOutcome::Reply(EXEC_HELP.to_string()),
            "show rules" => ShellOutcome::Reply(self.render_rules()),
            "configure terminal" => {
                self.mode = Mode::Config;
                ShellOutcome::Silent
            }
            "write memory" => {
                let rules = self.firewall.rules();
                ShellOutcome::Reply(match store::save_rules(&self.rules_file, &rules) {
                    Ok(()) => format!(
                        "Saved {} rules to {}",
                        rules.len(),
                        self.rules_file.display()
                    ),
                    Err(err) => format!("Failed to save rules: {err}"),
                })
            }
            other => self.dispatch(other),
        }
    }

    fn handle_config(&mut self, line: &str) -> ShellOutcome {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["exit"] | ["end"] => {
                self.mode = Mode::Exec;
                ShellOutcome::Silent
            }
            ["help"] => ShellOutcome::Reply(CONFIG_HELP.to_string()),
            ["rule", "add", action, pairs @ ..] => {
                ShellOutcome::Reply(match parse_rule(action, pairs) {
                    Ok(rule) => {
                        let summary = rule.to_string();
                        // Append is infallible; insertion indexes are not
                        // exposed here.
                        match self.firewall.add_rule(rule, None) {
                            Ok(()) => {
                                format!("Added rule {}: {summary}", self.firewall.len() - 1)
                            }
                            Err(err) => format!("Failed to add rule: {err}"),
                        }
                    }
                    Err(msg) => msg,
                })
            }
            ["rule", "del", index] => ShellOutcome::Reply(match index.parse::<usize>() {
                Ok(index) => match self.firewall.remove_rule(index) {
                    Ok(removed) => format!("Removed rule {index}: {removed}"),
                    Err(err) => format!("Failed to remove rule: {err}"),
                },
                Err(_) => format!("Not an index: {index}"),
            }),
            ["rule", "show", index] => ShellOutcome::Reply(match index.parse::<usize>() {
                Ok(index) => match self.firewall.rules().get(index) {
                    Some(rule) => format!("{index}: {rule}"),
                    None => format!("No rule at index {index}"),
                },
                Err(_) => format!("Not an index: {index}"),
            }),
            _ => self.dispatch(line),
        }
    }

    fn dispatch(&self, line: &str) -> ShellOutcome {
        match self.pipeline.dispatch_command(line) {
            Some(reply) => ShellOutcome::Reply(reply),
            None => ShellOutcome::Silent,
        }
    }

    fn render_rules(&self) -> String {
        let rules = self.firewall.rules();
        if rules.is_empty() {
            return "No firewall rules configured.".to_string();
        }
        rules
            .iter()
            .enumerate()
            .map(|(idx, rule)| format!("{idx}: {rule}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Interactive loop over stdin/stdout until `exit` or end of input.
    pub async fn run(mut self) -> std::io::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();
        loop {
            stdout.write_all(self.prompt().as_bytes()).await?;
            stdout.flush().await?;
            let Some(line) = lines.next_line().await? else {
                break;
            };
            match self.handle_line(&line) {
                ShellOutcome::Reply(reply) => {
                    stdout.write_all(reply.as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                }
                ShellOutcome::Silent => {}
                ShellOutcome::Exit => break,
            }
        }
        Ok(())
    }
}

/// Build a rule from `<allow|deny> key=value ...` tokens.
///
/// `src` and `source` alias `ip`; `domain` aliases `host`.
fn parse_rule(action: &str, pairs: &[&str]) -> Result<Rule, String> {
    let mut rule = match action {
        "allow" => Rule::allow(),
        "deny" => Rule::deny(),
        other => return Err(format!("Unknown action: {other} (expected allow or deny)")),
    };
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(format!("Expected key=value, got: {pair}"));
        };
        rule = match key {
            "ip" | "src" | "source" => rule
                .with_ip(value)
                .map_err(|err| format!("Bad ip pattern: {err}"))?,
            "method" => rule.with_method(value),
            "host" | "domain" => rule.with_host(value),
            "path" => rule.with_path(value),
            other => return Err(format!("Unknown matcher key: {other}")),
        };
    }
    Ok(rule)
}
