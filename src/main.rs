//! Dugout Server
//!
//! Authoritative server for the dugout baseball rules engine.
//! With `--serve` it listens for WebSocket clients; otherwise it plays a
//! seeded CPU-vs-CPU demo game and verifies it by replay.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use dugout::{
    VERSION, SCHEDULED_INNINGS, DIE_SIDES,
    DeterministicRng, GameMachine, CardPool, Command, Issuer, Side,
    game::{
        cpu::{self, CpuActor},
        events::GameEventData,
        state::GameConfig,
    },
    network::{GameServer, ServerConfig},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    info!("Dugout Server v{}", VERSION);
    info!("d{} dice, {} scheduled innings", DIE_SIDES, SCHEDULED_INNINGS);

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--serve") {
        let server = GameServer::new(ServerConfig::from_env());
        server.run().await?;
        return Ok(());
    }

    let seed = match args.first() {
        Some(raw) => raw.parse().with_context(|| format!("invalid seed {raw:?}"))?,
        None => 12345,
    };
    demo_game(seed)
}

/// Play a CPU-vs-CPU game and check it replays to the same hash.
fn demo_game(seed: u64) -> anyhow::Result<()> {
    info!("=== Starting Demo Game ===");

    let game_id = [1u8; 16];
    let pool = Arc::new(CardPool::builtin());
    let mut machine = GameMachine::new(game_id, seed, GameConfig::default(), Arc::clone(&pool))?;

    info!("Game ID: {}", hex::encode(game_id));
    info!("RNG Seed: {}", seed);

    machine.handle(Issuer::Host, Command::StartGame { vs_cpu: false, cpu_is_home: false })?;

    let actors = [CpuActor::new(Side::Away), CpuActor::new(Side::Home)];
    let mut dice = DeterministicRng::new(seed);
    let steps = cpu::play_out(&mut machine, &actors, &mut dice)?;

    let mut total_events = 0;
    for event in machine.take_events() {
        total_events += 1;
        match &event.data {
            GameEventData::InningChanged { inning, half } => {
                info!("Inning {} ({:?})", inning, half);
            }
            GameEventData::ScoreChanged { away, home } => {
                info!("Score: away {} - home {}", away, home);
            }
            GameEventData::GameOver { winner, away, home } => {
                info!("Game over: {:?} wins, {}-{}", winner, away, home);
            }
            _ => {}
        }
    }

    info!("=== Final ===");
    let session = machine.session();
    info!("Away: {:?} = {}", session.line_score.away, session.score(Side::Away));
    info!("Home: {:?} = {}", session.line_score.home, session.score(Side::Home));
    info!("Innings: {}, inputs: {}, events: {}", session.inning, steps, total_events);

    let hash = machine.state_hash();
    info!("Final State Hash: {}", hex::encode(hash));

    info!("=== Verifying Determinism ===");
    let transcript = machine.transcript();
    let bytes = transcript.to_bytes()?;
    info!("Transcript: {} entries, {} bytes", machine.entries().len(), bytes.len());
    transcript.verify(pool).context("replay diverged")?;
    info!("DETERMINISM VERIFIED: replay reached {}", hex::encode(transcript.final_hash));

    Ok(())
}
