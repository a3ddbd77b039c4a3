use crate::config::ServerConfig;
use crate::controller::{CommandSource, GameController, Verdict};
use crate::error::CommandError;
use crate::host::{Audience, Collaborators, Notifier, PlayerHost, ProgressSink};
use crate::items::{ItemPool, DEFAULT_CATALOG};
use crate::scatter::ScatterOutcome;
use crate::sim::{BotAction, ProceduralTerrain, SimBots, SimWorld};
use lootrush_shared::config::GameConfig;
use lootrush_shared::model::{ItemId, PlayerId, RoundPhase};
use lootrush_shared::protocol::{
    ClientMsg, CommandResultMsg, Notice, Progress, ServerMsg, WelcomeMsg, PROTOCOL_VERSION,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot};

/// Commands from client connections to the game loop
pub enum GameCommand {
    PlayerJoin {
        name: Option<String>,
        response: oneshot::Sender<(PlayerId, WelcomeMsg)>,
    },
    PlayerLeave {
        id: PlayerId,
    },
    Client {
        id: PlayerId,
        msg: ClientMsg,
    },
}

/// Broadcasts from game loop to all clients. Each connection filters what
/// concerns it.
#[derive(Debug, Clone)]
pub enum GameBroadcast {
    Notice { audience: Audience, notice: Notice },
    Progress(Progress),
    Phase(RoundPhase),
    /// Reply addressed to one connection
    Direct { to: PlayerId, msg: ServerMsg },
}

impl GameBroadcast {
    pub fn is_for(&self, id: PlayerId) -> bool {
        match self {
            GameBroadcast::Notice { audience, .. } => match audience {
                Audience::All => true,
                Audience::Participants(ids) => ids.contains(&id),
                Audience::Player(to) => *to == id,
                Audience::Console => false,
            },
            GameBroadcast::Progress(_) | GameBroadcast::Phase(_) => true,
            GameBroadcast::Direct { to, .. } => *to == id,
        }
    }

    pub fn to_server_msg(&self) -> ServerMsg {
        match self {
            GameBroadcast::Notice { notice, .. } => ServerMsg::Notice {
                notice: notice.clone(),
            },
            GameBroadcast::Progress(progress) => ServerMsg::Progress(progress.clone().into()),
            GameBroadcast::Phase(phase) => ServerMsg::Phase { phase: *phase },
            GameBroadcast::Direct { msg, .. } => msg.clone(),
        }
    }
}

/// Notices go out over the broadcast channel; console notices are logged.
struct BroadcastNotifier {
    tx: broadcast::Sender<GameBroadcast>,
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, audience: &Audience, notice: Notice) {
        if *audience == Audience::Console {
            tracing::info!("console: {:?}", notice);
            return;
        }
        let _ = self.tx.send(GameBroadcast::Notice {
            audience: audience.clone(),
            notice,
        });
    }
}

struct BroadcastProgress {
    tx: broadcast::Sender<GameBroadcast>,
}

impl ProgressSink for BroadcastProgress {
    fn report(&self, progress: Progress) {
        let _ = self.tx.send(GameBroadcast::Progress(progress));
    }
}

/// Controller wired to the simulated host.
pub fn build_controller(
    server_config: &ServerConfig,
    game_config: GameConfig,
    world: SimWorld,
    broadcast_tx: &broadcast::Sender<GameBroadcast>,
    scatter_tx: mpsc::UnboundedSender<ScatterOutcome>,
) -> GameController<SimWorld> {
    let seed = server_config.rng_seed;
    let terrain = ProceduralTerrain::new(seed)
        .with_latency(Duration::from_millis(server_config.chunk_latency_ms))
        .with_failure_rate(server_config.chunk_failure_rate);
    let items = ItemPool::new(
        DEFAULT_CATALOG.iter().copied(),
        &game_config.banned_items,
        seed,
    );
    let collaborators = Collaborators {
        players: world,
        terrain: Arc::new(terrain),
        notifier: Box::new(BroadcastNotifier {
            tx: broadcast_tx.clone(),
        }),
        progress: Arc::new(BroadcastProgress {
            tx: broadcast_tx.clone(),
        }),
        items: Box::new(items),
    };
    GameController::new(game_config, collaborators, scatter_tx, seed)
}

/// Run the main game loop. Owns all game state.
pub async fn run_game_loop(
    mut cmd_rx: mpsc::Receiver<GameCommand>,
    broadcast_tx: broadcast::Sender<GameBroadcast>,
    server_config: ServerConfig,
    game_config: GameConfig,
) {
    let tick_duration = game_config.tick_duration();
    let status_every_n = game_config.tick_rate_hz.max(1) as u64;

    let mut world = SimWorld::new();
    let mut bots = SimBots::spawn(&mut world, server_config.bot_count, server_config.rng_seed);
    let (scatter_tx, mut scatter_rx) = mpsc::unbounded_channel::<ScatterOutcome>();
    let mut game = build_controller(&server_config, game_config, world, &broadcast_tx, scatter_tx);
    let mut last_phase = game.phase();
    let mut tick_count: u64 = 0;

    tracing::info!(
        "Game loop running at {} Hz with {} bot(s)",
        game.config().tick_rate_hz,
        bots.ids().len()
    );

    let mut tick_interval = tokio::time::interval(tick_duration);
    tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tick_interval.tick() => {
                let now = Instant::now();
                let target = game.target().cloned();
                for action in bots.tick(game.phase(), target.as_ref()) {
                    apply_bot_action(&mut game, action);
                }
                game.tick(now);

                // Status at 1 Hz while a round runs
                tick_count += 1;
                if tick_count % status_every_n == 0 && game.phase() != RoundPhase::Idle {
                    let status = ServerMsg::Status(game.status(now));
                    for id in game.players().online_players() {
                        if !bots.is_bot(id) {
                            let _ = broadcast_tx.send(GameBroadcast::Direct { to: id, msg: status.clone() });
                        }
                    }
                }
            }

            Some(outcome) = scatter_rx.recv() => {
                game.on_scatter_finished(outcome, Instant::now());
            }

            Some(cmd) = cmd_rx.recv() => {
                match cmd {
                    GameCommand::PlayerJoin { name, response } => {
                        let name = name.unwrap_or_else(|| "player".to_string());
                        let id = game.players_mut().join(&name);
                        game.on_join(id);
                        let welcome = WelcomeMsg {
                            protocol_version: PROTOCOL_VERSION,
                            self_id: id,
                            phase: game.phase(),
                            operator: server_config.clients_are_operators,
                        };
                        tracing::info!("{} ({}) joined", name, id);
                        let _ = response.send((id, welcome));
                    }
                    GameCommand::PlayerLeave { id } => {
                        game.players_mut().leave(id);
                        game.on_disconnect(id);
                        tracing::info!("Player {} left", id);
                    }
                    GameCommand::Client { id, msg } => {
                        let source = CommandSource::player(id, server_config.clients_are_operators);
                        if let Some(reply) = handle_client_msg(&mut game, source, msg) {
                            let _ = broadcast_tx.send(GameBroadcast::Direct { to: id, msg: reply });
                        }
                    }
                }
            }

            else => break,
        }

        if game.phase() != last_phase {
            last_phase = game.phase();
            let _ = broadcast_tx.send(GameBroadcast::Phase(last_phase));
        }
    }

    tracing::info!("Game loop ended");
}

/// Dispatch one client message. Admin commands produce a result reply.
pub fn handle_client_msg(
    game: &mut GameController<SimWorld>,
    source: CommandSource,
    msg: ClientMsg,
) -> Option<ServerMsg> {
    let (command, result) = match msg {
        ClientMsg::Start => ("start", game.start(source)),
        ClientMsg::Stop => ("stop", game.stop()),
        ClientMsg::Cancel => ("cancel", game.cancel()),
        ClientMsg::Skip => ("skip", game.skip()),
        ClientMsg::Role { role, targets } => {
            ("role", game.set_role(source, &role, &targets).map(|_| ()))
        }
        ClientMsg::Status => return Some(ServerMsg::Status(game.status(Instant::now()))),
        ClientMsg::Pickup { item } => {
            if let Some(id) = source.player {
                pickup(game, id, item);
            }
            return None;
        }
        ClientMsg::Die => {
            if let Some(id) = source.player {
                die(game, id);
            }
            return None;
        }
    };
    Some(command_result(command, result))
}

fn command_result(command: &str, result: Result<(), CommandError>) -> ServerMsg {
    if let Err(err) = &result {
        tracing::debug!("{} rejected: {}", command, err);
    }
    ServerMsg::CommandResult(CommandResultMsg {
        command: command.to_string(),
        ok: result.is_ok(),
        reason: result.err().map(|err| err.code().to_string()),
    })
}

fn pickup(game: &mut GameController<SimWorld>, id: PlayerId, item: ItemId) {
    if !game.players().is_alive(id) {
        return;
    }
    game.players_mut().give(id, item.as_str());
    game.on_pickup(id, &item);
}

/// Lethal damage: ignored while the damage filter cancels it, otherwise the
/// player dies and respawns at once.
fn die(game: &mut GameController<SimWorld>, id: PlayerId) {
    if !game.players().is_alive(id) || game.on_damage(id) == Verdict::Cancel {
        return;
    }
    game.players_mut().kill(id);
    game.on_death(id);
    game.players_mut().respawn(id);
}

fn apply_bot_action(game: &mut GameController<SimWorld>, action: BotAction) {
    match action {
        BotAction::Die(id) => die(game, id),
        BotAction::Pickup(id, item) => pickup(game, id, item),
        BotAction::Wander(id) => game.players_mut().nudge(id, 1.0, 0.0),
    }
}
