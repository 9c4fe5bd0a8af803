//! Scripted participants and the deterministic dice they roll.

use parlay::service::NewBot;

/// A simulated participant and the lines it can draw from.
#[derive(Debug, Clone)]
pub struct Persona {
    pub name: &'static str,
    pub model_type: &'static str,
    pub specialization: &'static str,
    pub opening: &'static str,
}

impl Persona {
    pub fn new_bot(&self) -> NewBot {
        NewBot::new(self.name, self.model_type).with_specialization(self.specialization)
    }

    pub fn interest(&self) -> String {
        format!("{} brings a {} perspective", self.name, self.specialization)
    }
}

pub const ROSTER: &[Persona] = &[
    Persona {
        name: "Stoa",
        model_type: "sim-philosopher",
        specialization: "philosophy and ethical reasoning",
        opening: "Uncertainty is an epistemic question before it is an engineering one.",
    },
    Persona {
        name: "Circuit",
        model_type: "sim-engineer",
        specialization: "technical systems",
        opening: "Confidence has to be represented and propagated, or it is lost at the first hop.",
    },
    Persona {
        name: "Ledger",
        model_type: "sim-ethicist",
        specialization: "accountability",
        opening: "When an uncertain system decides, someone still answers for the outcome.",
    },
    Persona {
        name: "Field",
        model_type: "sim-researcher",
        specialization: "empirical research",
        opening: "I want data on how people act on stated confidence, not intuitions.",
    },
];

pub const FRAMING_PROMPT: &str =
    "Should an AI system act under uncertainty, or defer to a human? When does deferring cause harm?";

pub const LINES: &[&str] = &[
    "There is a tension between being honest about uncertainty and keeping the user's trust.",
    "Deferring to humans is not always available. Time-critical cases remove that option.",
    "We keep trading accuracy against explainability, and the two goals conflict.",
    "A clear recommendation with caveats can do less harm than a bare percentage.",
    "Context decides here. Universal rules about uncertainty will fail somewhere.",
    "The stakes of the decision should set how much uncertainty we surface.",
];

pub const HUMAN_LINE: &str = "Real systems rarely get to pause for certainty. \
     Tell us how you would communicate doubt to a domain expert.";

/// Linear congruential generator; the same seed replays the same session.
#[derive(Debug, Clone)]
pub struct Dice(u64);

impl Dice {
    pub fn new(seed: u64) -> Self {
        Self(seed ^ 0x9e37_79b9_7f4a_7c15)
    }

    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.0 >> 33
    }

    /// Uniform-ish value in `low..=high`.
    pub fn between(&mut self, low: i64, high: i64) -> i64 {
        let span = (high - low + 1).max(1) as u64;
        low + (self.next() % span) as i64
    }

    /// True with roughly `percent`% probability.
    pub fn chance(&mut self, percent: u64) -> bool {
        self.next() % 100 < percent
    }

    pub fn pick<'a>(&mut self, items: &'a [&'a str]) -> &'a str {
        items[(self.next() % items.len() as u64) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dice_is_deterministic() {
        let mut a = Dice::new(7);
        let mut b = Dice::new(7);
        let rolls_a: Vec<i64> = (0..20).map(|_| a.between(30, 95)).collect();
        let rolls_b: Vec<i64> = (0..20).map(|_| b.between(30, 95)).collect();
        assert_eq!(rolls_a, rolls_b);
        assert!(rolls_a.iter().all(|r| (30..=95).contains(r)));
    }

    #[test]
    fn test_roster_names_unique() {
        let mut names: Vec<_> = ROSTER.iter().map(|p| p.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), ROSTER.len());
    }
}
