//! The pipeline scheduler.
//!
//! Stages run strictly in order. `progress.current_stage` names the last
//! stage that fully succeeded and is the sole resumption checkpoint: a
//! re-invocation picks up right after it. The first failing stage halts the
//! run and the aggregate is marked `Failed`; once every stage has succeeded
//! the runtime projection is built, persisted, and linked back.

use std::sync::Arc;

use dashmap::DashMap;
use storyforge_domain::{GameId, GameStatus, RuntimeGame};

use crate::infrastructure::ports::{GamePatch, GameRepo, RuntimeGameRepo};
use crate::pipeline::stage::{PipelineError, StageDescriptor};

pub struct GamePipeline {
    stages: Vec<StageDescriptor>,
    games: Arc<dyn GameRepo>,
    runtime_games: Arc<dyn RuntimeGameRepo>,
    in_flight: Arc<DashMap<GameId, ()>>,
}

impl GamePipeline {
    pub fn new(
        games: Arc<dyn GameRepo>,
        runtime_games: Arc<dyn RuntimeGameRepo>,
        stages: Vec<StageDescriptor>,
    ) -> Self {
        Self {
            stages,
            games,
            runtime_games,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Run the pipeline for one game to completion or first failure.
    ///
    /// All outcomes are also persisted on the aggregate, so fire-and-forget
    /// callers can follow along through the stored progress and status.
    pub async fn run(&self, id: GameId) -> Result<(), PipelineError> {
        let Some(_guard) = InFlightGuard::claim(&self.in_flight, id) else {
            return Err(PipelineError::AlreadyRunning(id));
        };

        match self.run_stages(id).await {
            Ok(()) => Ok(()),
            Err(error) => {
                self.persist_failure(id, &error).await;
                Err(error)
            }
        }
    }

    async fn run_stages(&self, id: GameId) -> Result<(), PipelineError> {
        let mut game = self
            .games
            .get(id)
            .await?
            .ok_or(PipelineError::GameNotFound(id))?;

        let resume_from = match game.progress.current_stage.as_str() {
            "" => 0,
            checkpoint => self
                .stages
                .iter()
                .position(|stage| stage.name == checkpoint)
                .map_or(0, |index| index + 1),
        };

        for descriptor in &self.stages[resume_from..] {
            tracing::info!(game_id = %id, stage = descriptor.name, "running stage");
            let outcome = descriptor.handler.execute(game).await?;
            game = outcome.game;

            if !outcome.success {
                let message = outcome
                    .error
                    .unwrap_or_else(|| "stage reported failure".to_string());
                tracing::warn!(game_id = %id, stage = descriptor.name, error = %message, "stage failed, halting run");
                return Err(PipelineError::StageFailed {
                    stage: descriptor.name,
                    message,
                    details: outcome.error_details,
                });
            }

            game.progress.advance(descriptor.name, descriptor.milestone);
            let patch = GamePatch {
                progress: Some(game.progress.clone()),
                ..GamePatch::default()
            };
            self.games.update(id, patch).await?;
        }

        self.complete(id, &game).await
    }

    async fn complete(&self, id: GameId, game: &storyforge_domain::Game) -> Result<(), PipelineError> {
        let runtime = RuntimeGame::project(game)?;
        let runtime = self.runtime_games.create(runtime).await?;

        let patch = GamePatch {
            runtime_id: Some(runtime.id),
            status: Some(GameStatus::Completed),
            ..GamePatch::default()
        };
        self.games.update(id, patch).await?;

        tracing::info!(game_id = %id, runtime_id = %runtime.id, "pipeline completed");
        Ok(())
    }

    /// Boundary error handling: every failure ends up on the aggregate.
    async fn persist_failure(&self, id: GameId, error: &PipelineError) {
        let (message, details) = match error {
            PipelineError::StageFailed {
                message, details, ..
            } => (message.clone(), details.clone()),
            other => (other.to_string(), None),
        };

        let patch = GamePatch {
            status: Some(GameStatus::Failed),
            error: Some(message),
            error_details: details,
            ..GamePatch::default()
        };
        if let Err(persist_error) = self.games.update(id, patch).await {
            tracing::error!(game_id = %id, %persist_error, "failed to persist pipeline failure");
        }
    }
}

/// Single-flight guard: at most one run per game id at a time.
struct InFlightGuard {
    runs: Arc<DashMap<GameId, ()>>,
    id: GameId,
}

impl InFlightGuard {
    fn claim(runs: &Arc<DashMap<GameId, ()>>, id: GameId) -> Option<Self> {
        if runs.insert(id, ()).is_some() {
            return None;
        }
        Some(Self {
            runs: runs.clone(),
            id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.runs.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use storyforge_domain::Game;
    use tokio::sync::Notify;

    use super::*;
    use crate::infrastructure::ports::{MockGameRepo, MockRuntimeGameRepo};
    use crate::pipeline::stage::{Stage, StageOutcome};

    struct FakeStage {
        name: &'static str,
        milestone: u8,
        fail: bool,
        executed: Arc<Mutex<Vec<&'static str>>>,
        hold: Option<Arc<Notify>>,
    }

    impl FakeStage {
        fn ok(name: &'static str, milestone: u8, executed: &Arc<Mutex<Vec<&'static str>>>) -> Self {
            Self {
                name,
                milestone,
                fail: false,
                executed: executed.clone(),
                hold: None,
            }
        }

        fn failing(name: &'static str, executed: &Arc<Mutex<Vec<&'static str>>>) -> Self {
            Self {
                name,
                milestone: 0,
                fail: true,
                executed: executed.clone(),
                hold: None,
            }
        }
    }

    #[async_trait]
    impl Stage for FakeStage {
        fn name(&self) -> &'static str {
            self.name
        }

        fn milestone(&self) -> u8 {
            self.milestone
        }

        async fn execute(&self, game: Game) -> Result<StageOutcome, PipelineError> {
            self.executed.lock().unwrap().push(self.name);
            if let Some(hold) = &self.hold {
                hold.notified().await;
            }
            if self.fail {
                Ok(StageOutcome::failure(game, "provider exploded"))
            } else {
                Ok(StageOutcome::success(game))
            }
        }
    }

    fn seeded_game(current_stage: &str) -> Game {
        let mut game = Game::new("test", "once upon a time", 3);
        game.progress.current_stage = current_stage.to_string();
        game
    }

    fn descriptors(stages: Vec<FakeStage>) -> Vec<StageDescriptor> {
        stages
            .into_iter()
            .map(|stage| StageDescriptor::new(Arc::new(stage)))
            .collect()
    }

    #[tokio::test]
    async fn resumes_after_the_persisted_checkpoint() {
        let executed = Arc::new(Mutex::new(Vec::new()));
        let stages = descriptors(vec![
            FakeStage::ok("alpha", 10, &executed),
            FakeStage::ok("beta", 50, &executed),
            FakeStage::ok("gamma", 90, &executed),
        ]);

        let game = seeded_game("alpha");
        let id = game.id;

        let mut games = MockGameRepo::new();
        games
            .expect_get()
            .returning(move |_| Ok(Some(game.clone())));
        games.expect_update().returning(|_, _| Ok(true));

        let mut runtime_games = MockRuntimeGameRepo::new();
        runtime_games
            .expect_create()
            .times(1)
            .returning(|runtime| Ok(runtime));

        let pipeline = GamePipeline::new(Arc::new(games), Arc::new(runtime_games), stages);
        pipeline.run(id).await.unwrap();

        assert_eq!(*executed.lock().unwrap(), vec!["beta", "gamma"]);
    }

    #[tokio::test]
    async fn unknown_checkpoint_restarts_from_the_beginning() {
        let executed = Arc::new(Mutex::new(Vec::new()));
        let stages = descriptors(vec![
            FakeStage::ok("alpha", 10, &executed),
            FakeStage::ok("beta", 50, &executed),
        ]);

        let game = seeded_game("retired_stage");
        let id = game.id;

        let mut games = MockGameRepo::new();
        games
            .expect_get()
            .returning(move |_| Ok(Some(game.clone())));
        games.expect_update().returning(|_, _| Ok(true));

        let mut runtime_games = MockRuntimeGameRepo::new();
        runtime_games.expect_create().returning(|runtime| Ok(runtime));

        let pipeline = GamePipeline::new(Arc::new(games), Arc::new(runtime_games), stages);
        pipeline.run(id).await.unwrap();

        assert_eq!(*executed.lock().unwrap(), vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn failure_halts_the_run_and_marks_the_game_failed() {
        let executed = Arc::new(Mutex::new(Vec::new()));
        let stages = descriptors(vec![
            FakeStage::ok("alpha", 10, &executed),
            FakeStage::failing("beta", &executed),
            FakeStage::ok("gamma", 90, &executed),
        ]);

        let game = seeded_game("");
        let id = game.id;

        let patches = Arc::new(Mutex::new(Vec::new()));
        let recorded = patches.clone();

        let mut games = MockGameRepo::new();
        games
            .expect_get()
            .returning(move |_| Ok(Some(game.clone())));
        games.expect_update().returning(move |_, patch| {
            recorded.lock().unwrap().push(patch);
            Ok(true)
        });

        let mut runtime_games = MockRuntimeGameRepo::new();
        runtime_games.expect_create().times(0);

        let pipeline = GamePipeline::new(Arc::new(games), Arc::new(runtime_games), stages);
        let error = pipeline.run(id).await.unwrap_err();

        assert!(matches!(
            error,
            PipelineError::StageFailed { stage: "beta", .. }
        ));
        assert_eq!(*executed.lock().unwrap(), vec!["alpha", "beta"]);

        let patches = patches.lock().unwrap();
        // alpha's progress advance, then the failure patch.
        assert_eq!(patches.len(), 2);
        let progress = patches[0].progress.as_ref().unwrap();
        assert_eq!(progress.current_stage, "alpha");
        assert_eq!(patches[1].status, Some(GameStatus::Failed));
        assert!(patches[1].error.as_deref().unwrap().contains("exploded"));
        assert!(patches[1].progress.is_none());
    }

    #[tokio::test]
    async fn progress_advances_with_each_successful_stage() {
        let executed = Arc::new(Mutex::new(Vec::new()));
        let stages = descriptors(vec![
            FakeStage::ok("alpha", 10, &executed),
            FakeStage::ok("beta", 50, &executed),
        ]);

        let game = seeded_game("");
        let id = game.id;

        let patches = Arc::new(Mutex::new(Vec::new()));
        let recorded = patches.clone();

        let mut games = MockGameRepo::new();
        games
            .expect_get()
            .returning(move |_| Ok(Some(game.clone())));
        games.expect_update().returning(move |_, patch| {
            recorded.lock().unwrap().push(patch);
            Ok(true)
        });

        let mut runtime_games = MockRuntimeGameRepo::new();
        runtime_games.expect_create().returning(|runtime| Ok(runtime));

        let pipeline = GamePipeline::new(Arc::new(games), Arc::new(runtime_games), stages);
        pipeline.run(id).await.unwrap();

        let patches = patches.lock().unwrap();
        assert_eq!(patches.len(), 3);
        assert_eq!(patches[0].progress.as_ref().unwrap().percent, 10);
        assert_eq!(patches[1].progress.as_ref().unwrap().percent, 50);
        assert_eq!(
            patches[1].progress.as_ref().unwrap().completed_stages,
            vec!["alpha", "beta"]
        );
        assert_eq!(patches[2].status, Some(GameStatus::Completed));
        assert!(patches[2].runtime_id.is_some());
    }

    #[tokio::test]
    async fn second_concurrent_run_for_the_same_game_is_refused() {
        let executed = Arc::new(Mutex::new(Vec::new()));
        let hold = Arc::new(Notify::new());

        let mut blocking = FakeStage::ok("alpha", 10, &executed);
        blocking.hold = Some(hold.clone());
        let stages = descriptors(vec![blocking]);

        let game = seeded_game("");
        let id = game.id;

        let mut games = MockGameRepo::new();
        games
            .expect_get()
            .returning(move |_| Ok(Some(game.clone())));
        games.expect_update().returning(|_, _| Ok(true));

        let mut runtime_games = MockRuntimeGameRepo::new();
        runtime_games.expect_create().returning(|runtime| Ok(runtime));

        let pipeline = Arc::new(GamePipeline::new(
            Arc::new(games),
            Arc::new(runtime_games),
            stages,
        ));

        let first = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.run(id).await }
        });
        // Let the first run claim the guard and park inside the stage.
        tokio::task::yield_now().await;

        let second = pipeline.run(id).await;
        assert!(matches!(second, Err(PipelineError::AlreadyRunning(_))));

        hold.notify_one();
        first.await.unwrap().unwrap();

        // Guard released, a fresh run is allowed again.
        hold.notify_one();
        pipeline.run(id).await.unwrap();
    }
}
