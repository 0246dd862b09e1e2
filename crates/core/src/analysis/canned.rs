use crate::analysis::{AnalysisError, AnalysisService, Roast};
use crate::capture::EncodedFrame;
use crate::emotion::Emotion;
use futures::future::BoxFuture;
use futures::FutureExt;
use rand::seq::IndexedRandom;
use rand::Rng;

const SPEECHLESS: &str = "I'm speechless... rare for me.";

fn base_roasts(emotion: Emotion) -> [&'static str; 3] {
    match emotion {
        Emotion::Happy => [
            "That grin? My circuits are overheating!",
            "Someone's happy... did you find a penny?",
            "Smiling like you won the lottery? You didn't.",
        ],
        Emotion::Sad => [
            "Why so glum? Did your dog leave you too?",
            "That frown belongs in a modern art museum.",
            "Cheer up! Or don't, I'm just a mirror.",
        ],
        Emotion::Angry => [
            "Whoa, who stole your coffee?",
            "Angry? You look like a tomato with a bad haircut.",
            "Rage looks good on you... said no one ever.",
        ],
        Emotion::Surprise => [
            "Surprised? Did you see your own outfit?",
            "Eyes wide open? You must have seen my electricity bill.",
            "Surprise! You still look like that.",
        ],
        Emotion::Fear => [
            "Scared? Don't worry, I won't show your real face.",
            "Is that fear or did you see your hair?",
            "Why so jumpy? I'm just judging you.",
        ],
        Emotion::Disgust => [
            "Disgusted? You should see what I see.",
            "That face? Did you smell yourself?",
            "Did you just taste your own cooking?",
        ],
        Emotion::Neutral => [
            "Resting mirror face, I see.",
            "Wow, you really woke up and chose 'meh'.",
            "No expression? Did you run out of emotions?",
        ],
    }
}

/// Every line the service could say for `emotion` at `confidence` (0-100).
pub fn roast_candidates(emotion: Emotion, confidence: f32) -> Vec<String> {
    let mut lines: Vec<String> = base_roasts(emotion).iter().map(|s| (*s).to_owned()).collect();

    if confidence > 85.0 {
        lines.push(format!("Wow, really committing to that {emotion} face."));
    } else if confidence < 40.0 {
        lines.push("Can't tell if that's an expression or gas.".to_owned());
    }

    match emotion {
        Emotion::Happy if confidence > 75.0 => {
            lines.push("Someone's overcompensating with that smile.".to_owned());
        }
        Emotion::Sad if confidence > 70.0 => {
            lines.push("Tears would really complete this look.".to_owned());
        }
        _ => {}
    }
    lines
}

/// Offline stand-in for the remote service. Ignores the frame content and
/// draws an expression at random.
#[derive(Clone, Debug, Default)]
pub struct CannedAnalysisService;

impl CannedAnalysisService {
    pub fn new() -> Self {
        Self
    }

    pub fn draw(&self, rng: &mut impl Rng) -> Roast {
        let emotion = *Emotion::ALL.choose(rng).unwrap_or(&Emotion::Neutral);
        let confidence = rng.random_range(0.0f32..100.0);
        let text = roast_candidates(emotion, confidence)
            .choose(rng)
            .cloned()
            .unwrap_or_else(|| SPEECHLESS.to_owned());
        Roast {
            text,
            emotion: Some(emotion.label().to_owned()),
        }
    }
}

impl AnalysisService for CannedAnalysisService {
    fn analyze(&self, frame: EncodedFrame) -> BoxFuture<'_, Result<Roast, AnalysisError>> {
        let roast = self.draw(&mut rand::rng());
        tracing::debug!(
            bytes = frame.bytes.len(),
            emotion = roast.emotion.as_deref().unwrap_or_default(),
            "canned analysis"
        );
        async move { Ok(roast) }.boxed()
    }
}
