//! modwatch — Binary Entrypoint
//! Boots the polling scheduler: watermark store, source checkers, webhook
//! sinks, and the fixed-schedule community posts.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use modwatch::announce::Announcer;
use modwatch::check::{
    a3sync::A3syncChecker, calendar::CalendarChecker, cup::CupChecker, github::GithubChecker,
    steam::SteamChecker, SourceChecker,
};
use modwatch::config;
use modwatch::notify::{discord::DiscordSink, MessageSink};
use modwatch::routine;
use modwatch::schedule::{Scheduler, StartPolicy, TaskSpec};
use modwatch::watermark::WatermarkStore;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("modwatch=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = config::load_default().context("loading configuration")?;
    let store = Arc::new(WatermarkStore::open(&cfg.state_path).await);
    let sink: Arc<dyn MessageSink> = Arc::new(DiscordSink::new(cfg.channels.clone()));

    let github = Arc::new(GithubChecker::new(
        cfg.github.api_base.clone(),
        cfg.github.repos.clone(),
        std::env::var("GITHUB_TOKEN").ok(),
        Arc::clone(&store),
    ));
    let cup = Arc::new(CupChecker::new(cfg.cup.url.clone(), Arc::clone(&store)));
    let steam = Arc::new(SteamChecker::new(
        cfg.steam.api_base.clone(),
        cfg.steam.community_base.clone(),
        cfg.steam.file_ids.clone(),
        Arc::clone(&store),
    ));
    let a3sync = Arc::new(A3syncChecker::new(
        cfg.a3sync.url.clone(),
        Arc::clone(&store),
    ));

    let announcer = Arc::new(Announcer::new(
        Arc::clone(&sink),
        cfg.calendar.routes.clone(),
        cfg.roles.clone(),
        cfg.calendar.default_channel.clone(),
    ));
    let calendar = Arc::new(CalendarChecker::new(
        cfg.calendar.api_base.clone(),
        cfg.calendar.calendar_id.clone(),
        std::env::var("CALENDAR_TOKEN").ok(),
        Arc::clone(&store),
        announcer,
    ));

    let admin_role = cfg.roles.get("admin").cloned();
    let mut sched = Scheduler::new();

    // Release monitoring across GitHub, CUP and Steam goes out as one
    // combined staff post per cycle.
    {
        let checkers: Vec<Arc<dyn SourceChecker>> = vec![github, cup, steam];
        let sink = Arc::clone(&sink);
        let admin_role = admin_role.clone();
        sched.spawn(
            TaskSpec::new("modcheck", Duration::from_secs(cfg.intervals.modcheck)),
            move || {
                let checkers = checkers.clone();
                let sink = Arc::clone(&sink);
                let admin_role = admin_role.clone();
                async move {
                    let mut post = String::new();
                    for checker in &checkers {
                        match checker.check().await {
                            Ok(outcome) if outcome.changed => post.push_str(&outcome.post),
                            Ok(_) => {}
                            Err(e) => {
                                tracing::warn!(source = checker.name(), error = format!("{e:#}"), "check failed")
                            }
                        }
                    }
                    if !post.is_empty() {
                        let ping = admin_role
                            .as_deref()
                            .map(|r| format!("<@&{r}>\n"))
                            .unwrap_or_default();
                        sink.post("staff", &format!("{ping}{post}")).await?;
                    }
                    Ok(())
                }
            },
        );
    }

    {
        let a3sync = Arc::clone(&a3sync);
        let sink = Arc::clone(&sink);
        sched.spawn(
            TaskSpec::new("a3sync", Duration::from_secs(cfg.intervals.a3sync))
                .starting(StartPolicy::Offset(Duration::from_secs(5))),
            move || {
                let a3sync = Arc::clone(&a3sync);
                let sink = Arc::clone(&sink);
                async move {
                    let outcome = a3sync.check().await?;
                    if outcome.changed {
                        sink.post("announcements", &outcome.post).await?;
                    }
                    Ok(())
                }
            },
        );
    }

    {
        let calendar = Arc::clone(&calendar);
        sched.spawn(
            TaskSpec::new("calendar", Duration::from_secs(cfg.intervals.calendar)),
            move || {
                let calendar = Arc::clone(&calendar);
                async move {
                    calendar.check().await?;
                    Ok(())
                }
            },
        );
    }

    {
        let sink = Arc::clone(&sink);
        let admin_role = admin_role.clone();
        sched.spawn(
            TaskSpec::new("attendance", Duration::from_secs(3600)).starting(StartPolicy::NextHour),
            move || {
                let sink = Arc::clone(&sink);
                let admin_role = admin_role.clone();
                async move {
                    if routine::attendance_due(Utc::now()) {
                        routine::attendance_post(&sink, admin_role.as_deref(), "admin").await?;
                    }
                    Ok(())
                }
            },
        );
    }

    {
        let sink = Arc::clone(&sink);
        let admin_role = admin_role.clone();
        sched.spawn(
            TaskSpec::new("recruitment", Duration::from_secs(24 * 3600))
                .starting(StartPolicy::AtTime { hour: 17, minute: 0 }),
            move || {
                let sink = Arc::clone(&sink);
                let admin_role = admin_role.clone();
                async move {
                    if routine::recruitment_due(Utc::now()) {
                        routine::recruitment_post(&sink, admin_role.as_deref(), "staff").await?;
                    }
                    Ok(())
                }
            },
        );
    }

    {
        let sink = Arc::clone(&sink);
        sched.spawn(
            TaskSpec::new("presence", Duration::from_secs(cfg.intervals.presence))
                .starting(StartPolicy::NextMinute),
            move || {
                let sink = Arc::clone(&sink);
                async move { routine::presence_post(&sink, "status").await }
            },
        );
    }

    tracing::info!("modwatch started");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutting down");
    sched.shutdown().await;
    Ok(())
}
