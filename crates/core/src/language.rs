// SPDX-FileCopyrightText: © 2025 KITT Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Static table of languages the agent can listen and speak in.

use std::sync::OnceLock;

/// One entry of the supported-language table.
///
/// `code` is the BCP-47 tag used throughout the agent and on the wire
/// (e.g. as the `<lang-code>` prefix parsed by `ChatCompleter`). `stt_code`
/// is the code passed to the speech-recognition provider, which for some
/// languages differs from the BCP-47 tag (e.g. `cmn-CN` speaks as `zh`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Language {
    pub code: &'static str,
    pub label: &'static str,
    pub stt_code: &'static str,
    pub tts_voice_id: &'static str,
}

const SUPPORTED: &[Language] = &[
    Language { code: "en-US", label: "English", stt_code: "en-US", tts_voice_id: "en-US-Wavenet-D" },
    Language { code: "fr-FR", label: "Français", stt_code: "fr-FR", tts_voice_id: "fr-FR-Wavenet-C" },
    Language { code: "de-DE", label: "Deutsch", stt_code: "de-DE", tts_voice_id: "de-DE-Wavenet-B" },
    Language { code: "ja-JP", label: "日本語", stt_code: "ja-JP", tts_voice_id: "ja-JP-Wavenet-B" },
    Language { code: "cmn-CN", label: "中文", stt_code: "zh", tts_voice_id: "cmn-CN-Wavenet-A" },
    Language { code: "es-ES", label: "Español", stt_code: "es-ES", tts_voice_id: "es-ES-Wavenet-B" },
];

const DEFAULT_CODE: &str = "en-US";

fn table() -> &'static [Language] {
    static TABLE: OnceLock<&'static [Language]> = OnceLock::new();
    *TABLE.get_or_init(|| SUPPORTED)
}

impl Language {
    /// Looks up a language by its BCP-47 code (exact, case-sensitive match).
    #[must_use]
    pub fn by_code(code: &str) -> Option<Self> {
        table().iter().copied().find(|l| l.code == code)
    }

    /// The default language used when a room has not negotiated one (`en-US`).
    #[must_use]
    pub fn default_language() -> Self {
        #[allow(clippy::expect_used)]
        Self::by_code(DEFAULT_CODE).expect("default language must be in the supported table")
    }

    /// All languages the agent can listen and speak in.
    #[must_use]
    pub fn all() -> &'static [Self] {
        table()
    }
}

impl Default for Language {
    fn default() -> Self {
        Self::default_language()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_en_us() {
        assert_eq!(Language::default_language().code, "en-US");
    }

    #[test]
    fn looks_up_cmn_with_distinct_stt_code() {
        let cmn = Language::by_code("cmn-CN").expect("cmn-CN is supported");
        assert_eq!(cmn.stt_code, "zh");
    }

    #[test]
    fn unknown_code_is_none() {
        assert!(Language::by_code("xx-XX").is_none());
    }

    #[test]
    fn all_six_languages_present() {
        assert_eq!(Language::all().len(), 6);
    }
}
