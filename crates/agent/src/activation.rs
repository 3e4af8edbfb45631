// SPDX-FileCopyrightText: © 2025 KITT Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Decides whether a recognizer result should trigger an answer turn.
//!
//! Solo rooms answer on any final utterance; multi-party rooms require a
//! leading wake phrase before a designated speaker's subsequent final is
//! answered. The epoch counter on [`ActiveState`] guards the idle
//! watchdog: any later mutation of the active speaker bumps the epoch,
//! so a watchdog scheduled against a stale epoch fires as a no-op
//! (checked in [`ActivationController::expire`]) instead of clearing a
//! speaker that has since changed.
//!
//! "Multi-party" is defined here as `human_count >= 2` (solo is exactly
//! one human); see `DESIGN.md` for the reasoning.

use std::time::Duration;

use kitt_core::signaling::UiState;
use kitt_core::{ActiveSpeaker, Language};

/// How long an activated-but-unanswered speaker stays designated before
/// the watchdog clears them and the agent emits `state_Idle`.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(4);

/// Greeting words recognized at the start of a wake phrase.
const GREETINGS: &[&str] = &["hi", "hello", "hey", "hallo", "salut", "bonjour", "hola", "eh", "ey"];

/// Bot-name tokens recognized as the second half of a wake phrase.
const NAMES: &[&str] = &["kit", "gpt", "kitt", "livekit", "live-kit", "kid"];

/// How many leading words of a transcript the wake-phrase scan considers.
const WAKE_WINDOW: usize = 2;

/// A detected wake phrase, returned by the swappable [`detect_activation`]
/// strategy, kept deliberately trivial to allow later replacement with a
/// smarter detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationIntent {
    pub greeting: String,
    pub name: String,
}

/// Scans the first two lowercased words of `text` for a greeting
/// immediately followed by a bot-name token. Language-independent by
/// design (the fixed word lists are English-only placeholders); `_lang`
/// is accepted so a future per-language strategy can be swapped in
/// without changing `ActivationController`'s call site.
#[must_use]
pub fn detect_activation(text: &str, _lang: &Language) -> Option<ActivationIntent> {
    let mut words = text.split_whitespace().take(WAKE_WINDOW).map(normalize_word);

    let greeting = words.next()?;
    let name = words.next()?;

    if GREETINGS.contains(&greeting.as_str()) && NAMES.contains(&name.as_str()) {
        Some(ActivationIntent { greeting, name })
    } else {
        None
    }
}

fn normalize_word(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric() && c != '-').to_lowercase()
}

/// Room quorum, per the Open Question resolution above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quorum {
    Solo,
    MultiParty,
}

impl Quorum {
    #[must_use]
    pub const fn from_human_count(human_count: usize) -> Self {
        if human_count <= 1 {
            Self::Solo
        } else {
            Self::MultiParty
        }
    }
}

/// A (re)scheduling instruction for the idle watchdog; the `Agent` actor
/// owns the actual `tokio::time::sleep`, since `ActivationController`
/// itself stays synchronous and testable without a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogArm {
    pub epoch: u64,
    pub after: Duration,
}

/// What the `Agent` should do in response to one `RecognizeResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Evaluation {
    /// Start an answer turn for this result (subject to `is_busy`, which
    /// this controller does not track — the agent keeps that as its own
    /// atomic flag).
    pub should_answer: bool,
    /// A UI state change to emit, if the activation state changed.
    pub ui_state: Option<UiState>,
    /// A watchdog to (re)arm, if the active speaker was set, refreshed,
    /// or an activation was consumed.
    pub watchdog: Option<WatchdogArm>,
}

#[derive(Debug, Clone)]
struct ActiveState {
    speaker: ActiveSpeaker,
    /// Set when this speaker became active via a detected wake phrase
    /// that hasn't yet been "spent" by a matching short final.
    just_activated: bool,
}

/// Per-agent activation state machine. Holds just the active speaker
/// and its epoch; `last_activity_at` is represented implicitly by epoch
/// bumps rather than a stored timestamp, since every activity that should reset the
/// idle clock also invalidates any in-flight watchdog for the prior
/// epoch — the same effect with one less field to keep in sync.
#[derive(Debug, Default)]
pub struct ActivationController {
    active: Option<ActiveState>,
    next_epoch: u64,
}

impl ActivationController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_active(&self, participant_id: &str) -> bool {
        self.active.as_ref().is_some_and(|s| s.speaker.participant_id == participant_id)
    }

    #[must_use]
    pub fn active_participant(&self) -> Option<&str> {
        self.active.as_ref().map(|s| s.speaker.participant_id.as_str())
    }

    fn bump_epoch(&mut self) -> u64 {
        self.next_epoch += 1;
        self.next_epoch
    }

    /// Evaluates one `RecognizeResult` against the current state,
    /// mutating it according to the activation policy.
    pub fn on_result(
        &mut self,
        participant_id: &str,
        text: &str,
        is_final: bool,
        language: &Language,
        quorum: Quorum,
    ) -> Evaluation {
        match quorum {
            Quorum::Solo => self.on_result_solo(participant_id, is_final),
            Quorum::MultiParty => self.on_result_multi_party(participant_id, text, is_final, language),
        }
    }

    fn on_result_solo(&mut self, participant_id: &str, is_final: bool) -> Evaluation {
        let mut eval = Evaluation::default();

        // "set active = P if unset (purely so the UI can animate)" — no
        // watchdog in solo rooms; any final answers regardless of who's
        // nominally active.
        if self.active.is_none() {
            let epoch = self.bump_epoch();
            self.active = Some(ActiveState { speaker: ActiveSpeaker::new(participant_id, epoch), just_activated: false });
            eval.ui_state = Some(UiState::Active);
        }

        if is_final {
            eval.should_answer = true;
        }

        eval
    }

    fn on_result_multi_party(
        &mut self,
        participant_id: &str,
        text: &str,
        is_final: bool,
        language: &Language,
    ) -> Evaluation {
        let mut eval = Evaluation::default();

        // Update last_activity (epoch bump) if P is already active.
        if self.is_active(participant_id) {
            let epoch = self.bump_epoch();
            if let Some(state) = self.active.as_mut() {
                state.speaker.epoch = epoch;
                state.speaker.touch();
            }
            eval.watchdog = Some(WatchdogArm { epoch, after: IDLE_TIMEOUT });
        }

        if let Some(_intent) = detect_activation(text, language) {
            let epoch = self.bump_epoch();
            self.active = Some(ActiveState { speaker: ActiveSpeaker::new(participant_id, epoch), just_activated: true });
            eval.ui_state = Some(UiState::Active);
            eval.watchdog = Some(WatchdogArm { epoch, after: IDLE_TIMEOUT });
        }

        if is_final && self.is_active(participant_id) {
            let just_activated = self.active.as_ref().is_some_and(|s| s.just_activated);
            let short_enough = text.split_whitespace().count() <= WAKE_WINDOW + 1;

            if just_activated && short_enough {
                // The final IS the activation phrase: consume it, arm the
                // idle watchdog, and wait for the next final to answer.
                if let Some(state) = self.active.as_mut() {
                    state.just_activated = false;
                }
                let epoch = self.active.as_ref().map_or(0, |s| s.speaker.epoch);
                eval.watchdog = Some(WatchdogArm { epoch, after: IDLE_TIMEOUT });
            } else {
                eval.should_answer = true;
            }
        }

        eval
    }

    /// Called when a scheduled watchdog fires. A no-op (returns `None`)
    /// if `epoch` no longer matches the active speaker's current epoch.
    pub fn expire(&mut self, epoch: u64) -> Option<UiState> {
        match &self.active {
            Some(state) if state.speaker.epoch == epoch => {
                self.active = None;
                Some(UiState::Idle)
            }
            _ => None,
        }
    }

    /// Clears the active speaker at the start of an answer turn, so a
    /// stray transcript arriving mid-turn from the same participant
    /// doesn't fire a second turn.
    pub fn clear_for_turn(&mut self) {
        self.active = None;
    }

    /// Re-activates `participant_id` after a completed bot answer that
    /// ended with `?`, without going back through wake-phrase detection.
    pub fn reactivate(&mut self, participant_id: impl Into<String>) -> WatchdogArm {
        let epoch = self.bump_epoch();
        self.active = Some(ActiveState { speaker: ActiveSpeaker::new(participant_id, epoch), just_activated: false });
        WatchdogArm { epoch, after: IDLE_TIMEOUT }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lang() -> Language {
        Language::default_language()
    }

    #[test]
    fn detects_wake_phrase_greeting_then_name() {
        let intent = detect_activation("Hey KITT, what's up", &lang()).expect("matches");
        assert_eq!(intent.greeting, "hey");
        assert_eq!(intent.name, "kitt");
    }

    #[test]
    fn rejects_name_before_greeting() {
        assert!(detect_activation("KITT hey", &lang()).is_none());
    }

    #[test]
    fn rejects_unrelated_text() {
        assert!(detect_activation("tell me a joke", &lang()).is_none());
    }

    #[test]
    fn solo_room_answers_any_final() {
        let mut controller = ActivationController::new();
        let eval = controller.on_result("p1", "what's the time in Paris", true, &lang(), Quorum::Solo);
        assert!(eval.should_answer);
        assert_eq!(eval.ui_state, Some(UiState::Active));
    }

    #[test]
    fn solo_room_does_not_reactivate_ui_state_twice() {
        let mut controller = ActivationController::new();
        let _ = controller.on_result("p1", "hello", false, &lang(), Quorum::Solo);
        let second = controller.on_result("p1", "hello again", true, &lang(), Quorum::Solo);
        assert_eq!(second.ui_state, None);
        assert!(second.should_answer);
    }

    #[test]
    fn multi_party_ignores_transcript_without_wake_phrase() {
        let mut controller = ActivationController::new();
        let eval = controller.on_result("p1", "tell me a joke", true, &lang(), Quorum::MultiParty);
        assert!(!eval.should_answer);
        assert_eq!(eval.ui_state, None);
    }

    #[test]
    fn multi_party_wake_phrase_activates_without_answering() {
        let mut controller = ActivationController::new();
        let eval = controller.on_result("p1", "Hey KITT", true, &lang(), Quorum::MultiParty);
        assert!(!eval.should_answer);
        assert_eq!(eval.ui_state, Some(UiState::Active));
        assert!(controller.is_active("p1"));
        assert!(eval.watchdog.is_some());
    }

    #[test]
    fn multi_party_answers_the_final_after_activation() {
        let mut controller = ActivationController::new();
        let _ = controller.on_result("p1", "Hey KITT", true, &lang(), Quorum::MultiParty);
        let eval = controller.on_result("p1", "what's the weather today", true, &lang(), Quorum::MultiParty);
        assert!(eval.should_answer);
    }

    #[test]
    fn multi_party_combined_wake_and_command_answers_immediately() {
        // Over the ≤N+1 word ceiling for "just the wake phrase", so this
        // single final both activates and answers.
        let mut controller = ActivationController::new();
        let eval =
            controller.on_result("p1", "Hey KITT what time is it right now", true, &lang(), Quorum::MultiParty);
        assert!(eval.should_answer);
    }

    #[test]
    fn watchdog_expiry_clears_active_speaker_for_matching_epoch() {
        let mut controller = ActivationController::new();
        let eval = controller.on_result("p1", "Hey KITT", true, &lang(), Quorum::MultiParty);
        let epoch = eval.watchdog.expect("armed").epoch;

        let ui = controller.expire(epoch);
        assert_eq!(ui, Some(UiState::Idle));
        assert!(!controller.is_active("p1"));
    }

    #[test]
    fn stale_watchdog_epoch_is_a_no_op() {
        let mut controller = ActivationController::new();
        let first = controller.on_result("p1", "Hey KITT", true, &lang(), Quorum::MultiParty);
        let stale_epoch = first.watchdog.expect("armed").epoch;

        // New activity bumps the epoch before the stale watchdog fires.
        let _ = controller.on_result("p1", "never mind", false, &lang(), Quorum::MultiParty);

        assert_eq!(controller.expire(stale_epoch), None);
        assert!(controller.is_active("p1"));
    }

    #[test]
    fn reactivate_rearms_without_wake_phrase() {
        let mut controller = ActivationController::new();
        let arm = controller.reactivate("p2");
        assert!(controller.is_active("p2"));
        assert_eq!(arm.after, IDLE_TIMEOUT);
    }

    #[test]
    fn clear_for_turn_drops_active_speaker() {
        let mut controller = ActivationController::new();
        let _ = controller.on_result("p1", "Hey KITT", true, &lang(), Quorum::MultiParty);
        controller.clear_for_turn();
        assert!(!controller.is_active("p1"));
    }

    #[test]
    fn quorum_boundary_is_two_humans() {
        assert_eq!(Quorum::from_human_count(1), Quorum::Solo);
        assert_eq!(Quorum::from_human_count(2), Quorum::MultiParty);
    }
}
