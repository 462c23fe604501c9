use clap::{Parser, Subcommand};
use log::{info, warn};
use rtc_mesh::calls::{CallEvent, CallLogEntry};
use rtc_mesh::loopback::{LoopbackHub, ScriptedMediaEngine};
use rtc_mesh::relay::RelaySource;
use rtc_mesh::types::{CallKind, ChannelName, UserId};
use rtc_mesh::{CallConfig, DirectCallCoordinator, DirectCallState, GroupCallCoordinator};
use rtc_mesh_ureq_http_client::UreqHttpClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Parser)]
#[command(name = "call_sim")]
#[command(about = "Run call scenarios over an in-process signaling hub")]
#[command(
    long_about = "Drives direct and push-to-talk coordinators against each other using the loopback channel and scripted media engine. Relay servers are fetched from RTC_MESH_RELAY_URL when it is set."
)]
struct Cli {
    /// Print each participant's call log as JSON when done
    #[arg(short, long)]
    json: bool,

    /// Seconds to wait for each scenario step
    #[arg(long, default_value_t = 5)]
    step_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// One-to-one call from CALLER to CALLEE
    Direct {
        #[arg(default_value = "alice")]
        caller: String,
        #[arg(default_value = "bob")]
        callee: String,
        #[arg(short, long, default_value = "voice")]
        kind: CallKind,
        /// Have the callee decline instead of answering
        #[arg(long)]
        decline: bool,
    },
    /// Push-to-talk turn on a shared channel. The first member talks.
    Ptt {
        #[arg(short, long, default_value = "presence-ptt-demo")]
        channel: String,
        #[arg(default_values_t = ["alice".to_string(), "bob".to_string(), "carol".to_string()])]
        members: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let step = Duration::from_secs(cli.step_timeout);

    let logs = match cli.command {
        Commands::Direct {
            caller,
            callee,
            kind,
            decline,
        } => run_direct(caller.into(), callee.into(), kind, decline, step).await?,
        Commands::Ptt { channel, members } => {
            run_ptt(ChannelName::new(channel), members, step).await?
        }
    };

    if cli.json {
        for (user, log) in logs {
            println!("{}", serde_json::json!({ "user": user, "log": log }));
        }
    }
    Ok(())
}

fn config_for(user: &UserId) -> Result<(CallConfig, Arc<dyn RelaySource>), anyhow::Error> {
    let config = CallConfig::from_env(user.clone())?;
    let relay = config.relay.build_source(Arc::new(UreqHttpClient::new()));
    Ok((config, relay))
}

async fn run_direct(
    caller: UserId,
    callee: UserId,
    kind: CallKind,
    decline: bool,
    step: Duration,
) -> Result<Vec<(UserId, Vec<CallLogEntry>)>, anyhow::Error> {
    let hub = LoopbackHub::new();
    let start = |user: &UserId| -> Result<DirectCallCoordinator, anyhow::Error> {
        let (config, relay) = config_for(user)?;
        Ok(DirectCallCoordinator::start(
            config,
            hub.client(),
            ScriptedMediaEngine::new(user.as_str()),
            relay,
        ))
    };
    let a = start(&caller)?;
    let b = start(&callee)?;

    // Let both coordinators subscribe to their private channels
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut b_events = b.subscribe();
    a.place_call(callee.clone(), kind)?;
    wait_for_state(&mut b_events, DirectCallState::CallingIn, step).await?;
    info!("{callee} is ringing");

    if decline {
        b.decline()?;
    } else {
        b.answer()?;
    }

    let mut a_watch = a.watch();
    let outcome = tokio::time::timeout(step, async {
        loop {
            let snapshot = a_watch.borrow_and_update().clone();
            if snapshot.state == DirectCallState::CallRunning {
                return "running";
            }
            if decline && snapshot.call.is_none() {
                return "declined";
            }
            if a_watch.changed().await.is_err() {
                return "stopped";
            }
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("call did not settle in time"))?;
    info!("Call between {caller} and {callee}: {outcome}");

    let logs = vec![
        (caller.clone(), a.snapshot().log),
        (callee.clone(), b.snapshot().log),
    ];
    a.shutdown().await;
    b.shutdown().await;
    Ok(logs)
}

async fn wait_for_state(
    events: &mut broadcast::Receiver<CallEvent<DirectCallState>>,
    wanted: DirectCallState,
    step: Duration,
) -> Result<(), anyhow::Error> {
    tokio::time::timeout(step, async {
        loop {
            match events.recv().await {
                Ok(CallEvent::StateChanged(state)) if state == wanted => return Ok(()),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => warn!("Skipped {n} events"),
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(anyhow::anyhow!("coordinator stopped"));
                }
            }
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("timed out waiting for {wanted:?}"))?
}

async fn run_ptt(
    channel: ChannelName,
    members: Vec<String>,
    step: Duration,
) -> Result<Vec<(UserId, Vec<CallLogEntry>)>, anyhow::Error> {
    if members.len() < 2 {
        anyhow::bail!("a push-to-talk scenario needs at least two members");
    }
    let hub = LoopbackHub::new();
    let mut coordinators = Vec::new();
    for member in &members {
        let user = UserId::from(member.as_str());
        let (config, relay) = config_for(&user)?;
        let coordinator = GroupCallCoordinator::start(
            config,
            hub.client(),
            ScriptedMediaEngine::new(member.as_str()),
            relay,
        );
        coordinator.join(channel.clone())?;
        coordinators.push((user, coordinator));
    }

    let listeners = members.len() - 1;
    let (speaker_id, speaker) = &coordinators[0];
    let mut speaker_watch = speaker.watch();
    tokio::time::timeout(step, async {
        loop {
            let ready = {
                let snapshot = speaker_watch.borrow_and_update();
                snapshot.joined && snapshot.participants.len() == listeners
            };
            if ready || speaker_watch.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("members did not show up in time"))?;

    speaker.start_talking()?;
    tokio::time::timeout(step, async {
        loop {
            let connected = speaker_watch
                .borrow_and_update()
                .negotiations
                .iter()
                .filter(|n| n.answered)
                .count();
            if connected == listeners || speaker_watch.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("listeners did not answer in time"))?;
    info!("{speaker_id} is talking to {listeners} listener(s)");

    speaker.stop_talking()?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut logs = Vec::new();
    for (user, coordinator) in &coordinators {
        logs.push((user.clone(), coordinator.snapshot().log));
        coordinator.leave().await;
    }
    Ok(logs)
}
