//! Roleplay scenarios: who the model plays and in which voice

use serde::{Deserialize, Serialize};

/// Prebuilt voices offered by the service
pub const VOICES: [&str; 5] = ["Kore", "Fenrir", "Puck", "Charon", "Aoede"];

pub const DEFAULT_VOICE: &str = "Kore";

pub fn is_known_voice(voice: &str) -> bool {
    VOICES.contains(&voice)
}

/// Short human description of a voice
pub fn voice_description(voice: &str) -> Option<&'static str> {
    match voice {
        "Kore" => Some("female, standard"),
        "Fenrir" => Some("male, deep"),
        "Puck" => Some("male, young"),
        "Charon" => Some("male, older"),
        "Aoede" => Some("female, soft"),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

/// One practice conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub title: String,
    pub description: String,
    /// The part the model plays
    pub role: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default = "default_voice")]
    pub voice: String,
    /// Persona prompt sent when the session opens
    pub system_instruction: String,
}

fn default_voice() -> String {
    DEFAULT_VOICE.to_string()
}

/// Scenarios available before the user adds any
pub fn default_scenarios() -> Vec<Scenario> {
    vec![Scenario {
        id: "sales-1".to_string(),
        title: "Tough sale: skeptical customer".to_string(),
        description: "You are trying to sell our premium software.".to_string(),
        role: "Purchasing manager".to_string(),
        difficulty: Difficulty::Medium,
        voice: DEFAULT_VOICE.to_string(),
        system_instruction: "You are a purchasing manager at a mid-sized company. A sales \
            representative is pitching premium software to you. You are skeptical: the \
            current tools work well enough and budgets are tight. Push back on price, ask \
            for concrete evidence of value and only warm up when the arguments are specific \
            to your situation. Speak naturally and keep replies short."
            .to_string(),
    }]
}

/// Look up a scenario by id
pub fn find<'a>(scenarios: &'a [Scenario], id: &str) -> Option<&'a Scenario> {
    scenarios.iter().find(|s| s.id == id)
}
