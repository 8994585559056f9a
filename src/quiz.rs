//! Card formatting for the quiz variants, with multiple-choice distractors

use rand::seq::SliceRandom;
use rand::Rng;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{CoreError, Result};
use crate::grader::normalize_answer;
use crate::models::{QuizVariant, VocabularyItem};
use crate::store::{Catalog, DistractorScope};

pub const CLOZE_BLANK: &str = "_____";

/// A card ready to show to the learner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizCard {
    pub item_id: i64,
    /// Variant actually used; differs from the request after a cloze fallback
    pub variant: QuizVariant,
    pub question: String,
    pub correct_answer: String,
    /// Present for multiple-choice cards
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub is_new: bool,
}

/// Where a cloze sentence comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClozeSource {
    Authored(String),
    /// Built from an example sentence by blanking the word
    Derived(String),
    Missing,
}

impl ClozeSource {
    pub fn for_item(item: &VocabularyItem) -> Self {
        if let Some(authored) = item.cloze_sentences.iter().find(|s| !s.trim().is_empty()) {
            return ClozeSource::Authored(authored.clone());
        }

        let word = item.word.trim();
        if word.is_empty() {
            return ClozeSource::Missing;
        }
        let pattern = match RegexBuilder::new(&format!(r"\b{}\b", regex::escape(word)))
            .case_insensitive(true)
            .build()
        {
            Ok(pattern) => pattern,
            Err(e) => {
                log::warn!("Cannot build cloze pattern for '{}': {}", word, e);
                return ClozeSource::Missing;
            }
        };

        item.examples
            .iter()
            .find(|sentence| pattern.is_match(sentence))
            .map(|sentence| ClozeSource::Derived(pattern.replace_all(sentence, CLOZE_BLANK).into_owned()))
            .unwrap_or(ClozeSource::Missing)
    }
}

/// Turns catalog items into quiz cards
#[derive(Debug, Clone)]
pub struct QuizFormatter {
    option_count: usize,
}

impl QuizFormatter {
    pub fn new(option_count: usize) -> Self {
        Self {
            option_count: option_count.max(2),
        }
    }

    /// Format `item` as `variant`; items new to the learner get options
    pub fn format<C, R>(
        &self,
        catalog: &C,
        item: &VocabularyItem,
        variant: QuizVariant,
        is_new: bool,
        rng: &mut R,
    ) -> Result<QuizCard>
    where
        C: Catalog + ?Sized,
        R: Rng + ?Sized,
    {
        let mut card = QuizCard {
            item_id: item.id,
            variant,
            question: String::new(),
            correct_answer: String::new(),
            options: None,
            audio: None,
            image: None,
            is_new,
        };

        match variant {
            QuizVariant::DirectRecall => self.direct(item, &mut card),
            QuizVariant::ReverseRecall => {
                card.question = format!(
                    "Which word means: '{}'?",
                    &item.meaning.chars().take(100).collect::<String>()
                );
            }
            QuizVariant::ClozeDeletion => match ClozeSource::for_item(item) {
                ClozeSource::Authored(sentence) | ClozeSource::Derived(sentence) => {
                    card.question = format!("Fill in the blank: {}", sentence);
                }
                ClozeSource::Missing => {
                    log::debug!(
                        "No cloze sentence for item {}, falling back to direct recall",
                        item.id
                    );
                    self.direct(item, &mut card);
                }
            },
            QuizVariant::AudioRecall => {
                card.question = "Listen and type the word you hear".to_string();
                card.audio = Some(
                    item.media
                        .audio
                        .clone()
                        .unwrap_or_else(|| format!("tts:{}", item.word)),
                );
            }
            QuizVariant::ImageRecall => {
                let image = item.media.image.clone().ok_or_else(|| {
                    CoreError::PreconditionFailed(format!(
                        "Image recall requested for item {} which has no image",
                        item.id
                    ))
                })?;
                card.question = "Which word does this picture show?".to_string();
                card.image = Some(image);
            }
        }

        card.correct_answer = card.variant.expected_answer(item).to_string();
        if card.correct_answer.trim().is_empty() {
            return Err(CoreError::PreconditionFailed(format!(
                "Item {} has no answer for {}",
                item.id, card.variant
            )));
        }

        if is_new {
            card.options = Some(self.options(catalog, item, card.variant, &card.correct_answer, rng)?);
        }
        Ok(card)
    }

    fn direct(&self, item: &VocabularyItem, card: &mut QuizCard) {
        card.variant = QuizVariant::DirectRecall;
        card.question = format!("What is the meaning of '{}'?", item.word);
    }

    /// Correct answer plus up to `option_count - 1` distractors, shuffled
    fn options<C, R>(
        &self,
        catalog: &C,
        target: &VocabularyItem,
        variant: QuizVariant,
        correct: &str,
        rng: &mut R,
    ) -> Result<Vec<String>>
    where
        C: Catalog + ?Sized,
        R: Rng + ?Sized,
    {
        let needed = self.option_count - 1;
        let limit = 3 * needed;

        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(normalize_answer(correct));
        let mut distractors: Vec<String> = Vec::new();

        let related = catalog.distractor_candidates(target, DistractorScope::Related, &[], limit)?;
        collect_unique(&related, variant, &mut seen, &mut distractors);

        if distractors.len() < needed {
            let already: Vec<i64> = related.iter().map(|c| c.id).collect();
            let widened = catalog.distractor_candidates(target, DistractorScope::Any, &already, limit)?;
            collect_unique(&widened, variant, &mut seen, &mut distractors);
        }

        distractors.shuffle(rng);
        distractors.truncate(needed);
        if distractors.len() < needed {
            log::debug!(
                "Only {} distractors available for item {}",
                distractors.len(),
                target.id
            );
        }

        let mut options = distractors;
        options.push(correct.to_string());
        options.shuffle(rng);
        Ok(options)
    }
}

fn collect_unique(
    candidates: &[VocabularyItem],
    variant: QuizVariant,
    seen: &mut HashSet<String>,
    out: &mut Vec<String>,
) {
    for candidate in candidates {
        let answer = variant.expected_answer(candidate).trim();
        if answer.is_empty() {
            continue;
        }
        if seen.insert(normalize_answer(answer)) {
            out.push(answer.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn item(word: &str, meaning: &str, category: &str) -> VocabularyItem {
        let mut item = VocabularyItem::new(word, meaning);
        item.category = category.to_string();
        item
    }

    fn seeded_store(items: &[VocabularyItem]) -> (SqliteStore, Vec<i64>) {
        let store = SqliteStore::open_in_memory().unwrap();
        let ids = store.insert_items(items).unwrap();
        (store, ids)
    }

    #[test]
    fn test_cloze_prefers_authored_sentence() {
        let mut word = item("candid", "truthful and straightforward", "Default");
        word.cloze_sentences = vec![format!("She gave a {} answer.", CLOZE_BLANK)];
        word.examples = vec!["A candid reply.".into()];
        assert_eq!(
            ClozeSource::for_item(&word),
            ClozeSource::Authored("She gave a _____ answer.".into())
        );
    }

    #[test]
    fn test_cloze_derives_whole_word_case_insensitive() {
        let mut word = item("Run", "move fast", "Default");
        word.examples = vec![
            "The rerun aired twice.".into(),
            "Run, then run again!".into(),
        ];
        assert_eq!(
            ClozeSource::for_item(&word),
            ClozeSource::Derived("_____, then _____ again!".into())
        );
    }

    #[test]
    fn test_cloze_missing_falls_back_to_direct() {
        let (store, ids) = seeded_store(&[item("terse", "brief", "Default")]);
        let mut word = store.item(ids[0]).unwrap().unwrap();
        word.examples = vec!["Nothing relevant here.".into()];
        let mut rng = StdRng::seed_from_u64(1);

        let card = QuizFormatter::new(4)
            .format(&store, &word, QuizVariant::ClozeDeletion, false, &mut rng)
            .unwrap();
        assert_eq!(card.variant, QuizVariant::DirectRecall);
        assert_eq!(card.correct_answer, "brief");
        assert!(card.options.is_none());
    }

    #[test]
    fn test_image_recall_requires_image() {
        let (store, ids) = seeded_store(&[item("owl", "a night bird", "Animals")]);
        let word = store.item(ids[0]).unwrap().unwrap();
        let mut rng = StdRng::seed_from_u64(1);

        let err = QuizFormatter::new(4)
            .format(&store, &word, QuizVariant::ImageRecall, true, &mut rng)
            .unwrap_err();
        assert!(matches!(err, CoreError::PreconditionFailed(_)));
    }

    #[test]
    fn test_new_item_gets_unique_options_with_answer() {
        let (store, ids) = seeded_store(&[
            item("cat", "feline", "Animals"),
            item("dog", "canine", "Animals"),
            item("hound", "Canine", "Animals"),
            item("cow", "bovine", "Animals"),
            item("table", "furniture", "House"),
        ]);
        let target = store.item(ids[0]).unwrap().unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        let card = QuizFormatter::new(4)
            .format(&store, &target, QuizVariant::DirectRecall, true, &mut rng)
            .unwrap();
        let options = card.options.unwrap();
        assert_eq!(options.len(), 4);
        assert!(options.contains(&"feline".to_string()));

        let normalized: HashSet<String> = options.iter().map(|o| normalize_answer(o)).collect();
        assert_eq!(normalized.len(), 4);
        // related pool only had two unique answers, so the widen step pulled "furniture"
        assert!(options.contains(&"furniture".to_string()));
    }

    #[test]
    fn test_reverse_options_are_words() {
        let (store, ids) = seeded_store(&[
            item("big", "large", "Size"),
            item("small", "little", "Size"),
            item("tiny", "very small", "Size"),
            item("huge", "very large", "Size"),
        ]);
        let target = store.item(ids[0]).unwrap().unwrap();
        let mut rng = StdRng::seed_from_u64(3);

        let card = QuizFormatter::new(4)
            .format(&store, &target, QuizVariant::ReverseRecall, true, &mut rng)
            .unwrap();
        let mut options = card.options.unwrap();
        options.sort();
        assert_eq!(options, vec!["big", "huge", "small", "tiny"]);
    }

    #[test]
    fn test_small_catalog_yields_fewer_options() {
        let (store, ids) = seeded_store(&[item("yes", "affirmative", "Default"), item("no", "negative", "Default")]);
        let target = store.item(ids[0]).unwrap().unwrap();
        let mut rng = StdRng::seed_from_u64(3);

        let card = QuizFormatter::new(4)
            .format(&store, &target, QuizVariant::DirectRecall, true, &mut rng)
            .unwrap();
        assert_eq!(card.options.unwrap().len(), 2);
    }
}
