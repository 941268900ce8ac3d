//! Headless host: drives the engine from line commands on stdin and prints
//! everything the engine asks a front end to do as JSON lines on stdout.

use std::{str::SplitWhitespace, time::Duration as StdDuration};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use log::{debug, warn};
use serde::Serialize;
use serde_json::json;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
    time,
};

use crate::{
    commands,
    db::models::{ActiveDays, ChallengeMode, Schedule},
    engine::Engine,
    interception::InterstitialRequest,
    interstitial::{InterstitialSession, SessionState},
};

const TICK_INTERVAL_MS: u64 = 250;

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostCommand {
    Foreground(String),
    Track {
        identifier: String,
        mode: ChallengeMode,
        display_name: Option<String>,
    },
    Untrack(String),
    SetEnabled(String, bool),
    Schedule {
        identifier: String,
        schedule: Schedule,
    },
    Apps,
    Premium(bool),
    Type(String),
    Answer(String),
    Steps(u32),
    Tick,
    LetMeIn,
    Dismiss,
    Stats,
    Quit,
}

fn next_arg(parts: &mut SplitWhitespace<'_>, verb: &str, name: &str) -> Result<String> {
    parts
        .next()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("{verb}: missing {name}"))
}

fn parse_command(line: &str) -> Result<Option<HostCommand>> {
    let line = line.trim_end_matches(['\r', '\n']);

    // Typed text is taken verbatim; the phrase check is whitespace-sensitive.
    if let Some(text) = line.strip_prefix("type ") {
        return Ok(Some(HostCommand::Type(text.to_string())));
    }

    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Ok(None);
    };

    let command = match verb {
        "fg" => HostCommand::Foreground(next_arg(&mut parts, verb, "identifier")?),
        "track" => {
            let identifier = next_arg(&mut parts, verb, "identifier")?;
            let mode = match parts.next() {
                Some(mode) => mode.parse()?,
                None => ChallengeMode::default(),
            };
            let rest: Vec<&str> = parts.collect();
            let display_name = (!rest.is_empty()).then(|| rest.join(" "));
            HostCommand::Track {
                identifier,
                mode,
                display_name,
            }
        }
        "untrack" => HostCommand::Untrack(next_arg(&mut parts, verb, "identifier")?),
        "enable" => HostCommand::SetEnabled(next_arg(&mut parts, verb, "identifier")?, true),
        "disable" => HostCommand::SetEnabled(next_arg(&mut parts, verb, "identifier")?, false),
        "schedule" => {
            let identifier = next_arg(&mut parts, verb, "identifier")?;
            let start = next_arg(&mut parts, verb, "start hour")?;
            if start == "off" {
                HostCommand::Schedule {
                    identifier,
                    schedule: Schedule::default(),
                }
            } else {
                let end = next_arg(&mut parts, verb, "end hour")?;
                let days = match parts.next() {
                    Some(days) => ActiveDays::parse(days)?,
                    None => ActiveDays::WEEKDAYS,
                };
                HostCommand::Schedule {
                    identifier,
                    schedule: Schedule {
                        enabled: true,
                        start_hour: start.parse().context("invalid start hour")?,
                        end_hour: end.parse().context("invalid end hour")?,
                        days,
                    },
                }
            }
        }
        "apps" => HostCommand::Apps,
        "premium" => match next_arg(&mut parts, verb, "on|off")?.as_str() {
            "on" => HostCommand::Premium(true),
            "off" => HostCommand::Premium(false),
            other => bail!("premium: expected on or off, got '{other}'"),
        },
        "answer" => HostCommand::Answer(next_arg(&mut parts, verb, "answer")?),
        "steps" => HostCommand::Steps(
            next_arg(&mut parts, verb, "step count")?
                .parse()
                .context("invalid step count")?,
        ),
        "tick" => HostCommand::Tick,
        "letmein" => HostCommand::LetMeIn,
        "dismiss" => HostCommand::Dismiss,
        "stats" => HostCommand::Stats,
        "quit" | "exit" => HostCommand::Quit,
        other => bail!("unknown command '{other}'"),
    };

    Ok(Some(command))
}

fn emit<T: Serialize>(event: &str, payload: &T) {
    match serde_json::to_string(&json!({ "event": event, "data": payload })) {
        Ok(line) => println!("{line}"),
        Err(err) => warn!("Failed to serialize {event} event: {err}"),
    }
}

fn emit_error(message: impl std::fmt::Display) {
    emit("error", &json!({ "message": message.to_string() }));
}

struct Host {
    engine: Engine,
    session: Option<InterstitialSession>,
    own_identifier: String,
    home_identifier: Option<String>,
}

impl Host {
    fn new(engine: Engine) -> Self {
        let settings = engine.state().settings.get();
        let home_identifier = settings
            .surface_identity()
            .primary_launcher()
            .map(str::to_string);
        Self {
            engine,
            session: None,
            own_identifier: settings.own_identifier,
            home_identifier,
        }
    }

    fn present(&mut self, request: InterstitialRequest) -> Result<()> {
        emit("interstitial", &request);

        let now = Utc::now();
        let config = self.engine.state().settings.get().interstitial_config();
        if let Some(previous) = self.session.take() {
            warn!(
                "Replacing unresolved interstitial for {}",
                previous.identifier()
            );
        }
        let session = InterstitialSession::present(request, config, now);
        emit("session", &session.snapshot(now));
        self.session = Some(session);

        // The surface is now in front.
        self.engine.submit(self.own_identifier.clone(), now)
    }

    async fn finish_if_concluded(&mut self) -> Result<()> {
        let concluded = self
            .session
            .as_ref()
            .map(InterstitialSession::is_concluded)
            .unwrap_or(false);
        if !concluded {
            return Ok(());
        }
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        let now = Utc::now();
        let resolution = self.engine.state().arbiter.conclude(&session, now).await?;
        emit("resolution", &json!({
            "resolution": resolution,
            "outcome": session.outcome(),
        }));

        // Tear the surface down: through to the app on a pass, home otherwise.
        if resolution.allowed {
            self.engine.submit(session.identifier().to_string(), now)?;
        } else if let Some(home) = &self.home_identifier {
            self.engine.submit(home.clone(), now)?;
        }
        Ok(())
    }

    fn with_session<F>(&mut self, action: F) -> Result<()>
    where
        F: FnOnce(&mut InterstitialSession) -> Result<SessionState>,
    {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| anyhow!("no interstitial is showing"))?;
        action(session)?;
        emit("session", &session.snapshot(Utc::now()));
        Ok(())
    }

    /// Returns false once the host should stop.
    async fn run_command(&mut self, command: HostCommand) -> Result<bool> {
        let state = self.engine.state().clone();
        let now = Utc::now();

        match command {
            HostCommand::Foreground(identifier) => self.engine.submit(identifier, now)?,
            HostCommand::Track {
                identifier,
                mode,
                display_name,
            } => {
                let saved = commands::assign_challenge(&state, identifier, mode, display_name)
                    .await
                    .map_err(|e| anyhow!(e))?;
                emit("tracked", &saved);
            }
            HostCommand::Untrack(identifier) => {
                commands::untrack_app(&state, identifier.clone())
                    .await
                    .map_err(|e| anyhow!(e))?;
                emit("untracked", &json!({ "identifier": identifier }));
            }
            HostCommand::SetEnabled(identifier, enabled) => {
                commands::set_app_enabled(&state, identifier.clone(), enabled)
                    .await
                    .map_err(|e| anyhow!(e))?;
                emit("updated", &json!({ "identifier": identifier, "enabled": enabled }));
            }
            HostCommand::Schedule {
                identifier,
                schedule,
            } => {
                let mut app = commands::get_tracked_app(&state, identifier.clone())
                    .await
                    .map_err(|e| anyhow!(e))?
                    .ok_or_else(|| anyhow!("{identifier} is not tracked"))?;
                app.schedule = schedule;
                let saved = commands::track_app(&state, app).await.map_err(|e| anyhow!(e))?;
                emit("tracked", &saved);
            }
            HostCommand::Apps => {
                let apps = commands::list_tracked_apps(&state).await.map_err(|e| anyhow!(e))?;
                emit("apps", &apps);
            }
            HostCommand::Premium(premium) => {
                commands::set_premium(&state, premium).await.map_err(|e| anyhow!(e))?;
                emit("premium", &json!({ "premium": premium }));
            }
            HostCommand::Type(text) => self.with_session(|s| Ok(s.type_text(&text, now)))?,
            HostCommand::Answer(answer) => self.with_session(|s| Ok(s.submit_answer(&answer, now)))?,
            HostCommand::Steps(steps) => self.with_session(|s| Ok(s.record_steps(steps, now)))?,
            HostCommand::Tick => self.with_session(|s| Ok(s.tick(now)))?,
            HostCommand::LetMeIn => self.with_session(|s| {
                s.let_me_in(now)?;
                Ok(s.state())
            })?,
            HostCommand::Dismiss => self.with_session(|s| {
                s.dismiss(now);
                Ok(s.state())
            })?,
            HostCommand::Stats => {
                let stats = commands::get_usage_stats(&state).await.map_err(|e| anyhow!(e))?;
                emit("stats", &stats);
            }
            HostCommand::Quit => return Ok(false),
        }

        self.finish_if_concluded().await?;
        Ok(true)
    }

    async fn on_tick(&mut self) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let before = session.state();
        let had_error = session.challenge().has_error();
        let now = Utc::now();
        let after = session.tick(now);
        if after != before || had_error != session.challenge().has_error() {
            emit("session", &session.snapshot(now));
        }
        self.finish_if_concluded().await
    }
}

pub async fn run_host(
    engine: Engine,
    mut requests: mpsc::UnboundedReceiver<InterstitialRequest>,
) -> Result<()> {
    let mut host = Host::new(engine);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = time::interval(StdDuration::from_millis(TICK_INTERVAL_MS));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    debug!("stdin closed");
                    break;
                };
                match parse_command(&line) {
                    Ok(Some(command)) => match host.run_command(command).await {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(err) => emit_error(format!("{err:#}")),
                    },
                    Ok(None) => {}
                    Err(err) => emit_error(format!("{err:#}")),
                }
            }
            Some(request) = requests.recv() => {
                if let Err(err) = host.present(request) {
                    emit_error(format!("{err:#}"));
                }
            }
            _ = ticker.tick() => {
                if let Err(err) = host.on_tick().await {
                    emit_error(format!("{err:#}"));
                }
            }
        }
    }

    host.engine.shutdown().await
}
