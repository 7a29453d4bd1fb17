//! Pipeline stages, in canonical order.
//!
//! Chapter-mutating stages fan out per chapter; resource stages fan out per
//! generated asset. All of them persist their own domain output through
//! [`GameRepo`] so partial results survive a failed run.

mod background_music;
mod chapter_split;
mod character_art;
mod character_extraction;
mod dialogue_audio;
mod scene_art;
mod script_generation;
mod script_rewrite;

use std::sync::Arc;
use std::sync::OnceLock;

use regex_lite::Regex;

pub use background_music::BackgroundMusicStage;
pub use chapter_split::ChapterSplit;
pub use character_art::CharacterArtStage;
pub use character_extraction::CharacterExtraction;
pub use dialogue_audio::DialogueAudioStage;
pub use scene_art::SceneArtStage;
pub use script_generation::ScriptGeneration;
pub use script_rewrite::{script_background, script_bgm, ScriptRewrite};

use crate::config::PipelineConfig;
use crate::infrastructure::ports::{
    AssetSink, GameRepo, ImageGenPort, MusicGenPort, SpeechGenPort, TextGenPort,
};
use crate::pipeline::StageDescriptor;

/// Everything the stage set needs. Provider handles arrive pre-decorated
/// (rate limiting, polling) by whoever composes the application.
#[derive(Clone)]
pub struct StageDeps {
    pub games: Arc<dyn GameRepo>,
    pub text_gen: Arc<dyn TextGenPort>,
    pub image_gen: Arc<dyn ImageGenPort>,
    pub speech_gen: Arc<dyn SpeechGenPort>,
    pub music_gen: Arc<dyn MusicGenPort>,
    pub assets: Arc<dyn AssetSink>,
}

/// The canonical stage order the scheduler runs.
pub fn canonical_stages(deps: &StageDeps, config: &PipelineConfig) -> Vec<StageDescriptor> {
    let limit = config.fan_out_limit;
    vec![
        StageDescriptor::new(Arc::new(CharacterExtraction::new(
            deps.games.clone(),
            deps.text_gen.clone(),
        ))),
        StageDescriptor::new(Arc::new(ChapterSplit::new(
            deps.games.clone(),
            deps.text_gen.clone(),
        ))),
        StageDescriptor::new(Arc::new(ScriptGeneration::new(
            deps.games.clone(),
            deps.text_gen.clone(),
            limit,
        ))),
        StageDescriptor::new(Arc::new(script_background(
            deps.games.clone(),
            deps.text_gen.clone(),
            limit,
        ))),
        StageDescriptor::new(Arc::new(script_bgm(
            deps.games.clone(),
            deps.text_gen.clone(),
            limit,
        ))),
        StageDescriptor::new(Arc::new(CharacterArtStage::new(
            deps.games.clone(),
            deps.image_gen.clone(),
            deps.assets.clone(),
            limit,
        ))),
        StageDescriptor::new(Arc::new(SceneArtStage::new(
            deps.games.clone(),
            deps.image_gen.clone(),
            deps.assets.clone(),
            limit,
        ))),
        StageDescriptor::new(Arc::new(DialogueAudioStage::new(
            deps.games.clone(),
            deps.speech_gen.clone(),
            deps.assets.clone(),
            limit,
        ))),
        StageDescriptor::new(Arc::new(BackgroundMusicStage::new(
            deps.games.clone(),
            deps.music_gen.clone(),
            deps.assets.clone(),
            limit,
        ))),
    ]
}

/// Pull the payload out of a ```json fenced block; providers sometimes return
/// the bare payload, so fall back to the whole response.
pub(crate) fn extract_fenced_json(response: &str) -> &str {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"```json\s*([\s\S]*?)\s*```").expect("fence pattern is valid")
    });

    match fence.captures(response).and_then(|captures| captures.get(1)) {
        Some(payload) => payload.as_str(),
        None => response.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_json_is_extracted() {
        let response = "Here you go:\n```json\n{\"tags\": []}\n```\nEnjoy!";
        assert_eq!(extract_fenced_json(response), "{\"tags\": []}");
    }

    #[test]
    fn bare_payload_falls_through() {
        assert_eq!(extract_fenced_json("  {\"tags\": []} "), "{\"tags\": []}");
    }

    #[test]
    fn canonical_order_matches_the_stage_table() {
        use crate::infrastructure::ports::{
            MockAssetSink, MockGameRepo, MockImageGenPort, MockMusicGenPort, MockSpeechGenPort,
            MockTextGenPort,
        };

        let deps = StageDeps {
            games: Arc::new(MockGameRepo::new()),
            text_gen: Arc::new(MockTextGenPort::new()),
            image_gen: Arc::new(MockImageGenPort::new()),
            speech_gen: Arc::new(MockSpeechGenPort::new()),
            music_gen: Arc::new(MockMusicGenPort::new()),
            assets: Arc::new(MockAssetSink::new()),
        };

        let stages = canonical_stages(&deps, &PipelineConfig::default());
        let names: Vec<_> = stages.iter().map(|stage| stage.name).collect();
        assert_eq!(
            names,
            vec![
                "character_extraction",
                "chapter_split",
                "script_generation",
                "script_background",
                "script_bgm",
                "character_art",
                "scene_art",
                "dialogue_audio",
                "background_music",
            ]
        );

        let milestones: Vec<_> = stages.iter().map(|stage| stage.milestone).collect();
        assert_eq!(milestones, vec![10, 10, 30, 40, 50, 60, 70, 80, 90]);
    }
}
