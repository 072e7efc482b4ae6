//! Prompt construction for target-language words

use std::fmt;

use anyhow::Result;
use serde::Serialize;

/// How target words are presented to the model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    /// Bare word
    #[default]
    Zero,
    /// Word appended to a four-example translation template
    Few,
}

impl fmt::Display for PromptMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptMode::Zero => write!(f, "zero"),
            PromptMode::Few => write!(f, "few"),
        }
    }
}

/// Display name of a language code, in that language
pub fn language_name(code: &str) -> Option<&'static str> {
    match code {
        "eus_Latn" => Some("Euskara"),
        "eng_Latn" => Some("English"),
        "gle_Latn" => Some("Gaeilge"),
        "cmn_Hans" => Some("中文"),
        _ => None,
    }
}

fn few_shot_template(code: &str) -> Option<&'static str> {
    match code {
        "eus_Latn" => Some(concat!(
            "Euskara: \"txakurra\" - English: \"dog\"\n",
            "Euskara: \"katua\" - English: \"cat\"\n",
            "Euskara: \"etxe\" - English: \"house\"\n",
            "Euskara: \"mendi\" - English: \"mountain\"",
        )),
        "gle_Latn" => Some(concat!(
            "Gaeilge: \"madra\" - English: \"dog\"\n",
            "Gaeilge: \"cat\" - English: \"cat\"\n",
            "Gaeilge: \"teach\" - English: \"house\"\n",
            "Gaeilge: \"sléibhe\" - English: \"mountain\"",
        )),
        "cmn_Hans" => Some(concat!(
            "中文: \"狗\" - English: \"dog\"\n",
            "中文: \"猫\" - English: \"cat\"\n",
            "中文: \"房子\" - English: \"house\"\n",
            "中文: \"山\" - English: \"mountain\"",
        )),
        _ => None,
    }
}

/// Wrap each target word according to `mode`
///
/// Few-shot output ends with an open English quote, e.g. for `gle_Latn`
/// and "bean" the last line is `Gaeilge: "bean" - English: "`.
pub fn wrap_targets(mode: PromptMode, lang: &str, words: &[String]) -> Result<Vec<String>> {
    match mode {
        PromptMode::Zero => Ok(words.to_vec()),
        PromptMode::Few => {
            let (Some(template), Some(name)) = (few_shot_template(lang), language_name(lang))
            else {
                anyhow::bail!("No few-shot template for language {lang}");
            };
            Ok(words
                .iter()
                .map(|w| format!("{template}\n{name}: \"{w}\" - English: \""))
                .collect())
        }
    }
}
