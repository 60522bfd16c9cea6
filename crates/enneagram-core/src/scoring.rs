use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::questionnaire::{ArchetypeTable, QuestionnaireItem};
use crate::{AnswerSet, CoreError, TypeSlot, LIKERT_MAX};

/// Per-slot totals. Every slot `1..=9` is always present.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(transparent)]
pub struct ScoreVector(BTreeMap<TypeSlot, u32>);

impl ScoreVector {
    #[must_use]
    pub fn zeroed() -> Self {
        Self(TypeSlot::all().map(|slot| (slot, 0)).collect())
    }

    #[must_use]
    pub fn get(&self, slot: TypeSlot) -> u32 {
        self.0.get(&slot).copied().unwrap_or(0)
    }

    fn add(&mut self, slot: TypeSlot, value: u32) {
        let entry = self.0.entry(slot).or_insert(0);
        *entry = entry.saturating_add(value);
    }

    /// Highest total; ties go to the lowest slot.
    #[must_use]
    pub fn best_slot(&self) -> TypeSlot {
        let mut best = TypeSlot(TypeSlot::MIN);
        for slot in TypeSlot::all() {
            if self.get(slot) > self.get(best) {
                best = slot;
            }
        }
        best
    }
}

impl Default for ScoreVector {
    fn default() -> Self {
        Self::zeroed()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct Wing {
    pub type_slot: TypeSlot,
    pub percent: u8,
}

/// Classification computed from one complete answer set.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ResultFragment {
    pub type_slot: TypeSlot,
    pub type_name: String,
    pub archetype: String,
    pub affinity_percent: u8,
    pub raw_score: u32,
    pub sums: ScoreVector,
    pub counts: ScoreVector,
    /// `[left, right]`.
    pub wings: [Wing; 2],
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
}

/// `round(sum / (item_count * 5) * 100)` clamped to `0..=100`, with an empty slot
/// treated as a divisor of one.
#[must_use]
pub fn affinity_percent(sum: u32, item_count: u32) -> u8 {
    let max_possible = match u64::from(item_count) * u64::from(LIKERT_MAX) {
        0 => 1,
        value => value,
    };
    // Half-up rounding in integer arithmetic.
    let rounded = (u64::from(sum) * 200 + max_possible) / (2 * max_possible);
    u8::try_from(rounded.min(100)).unwrap_or(100)
}

/// Score a complete answer set.
///
/// Pure and deterministic: identical inputs always produce identical fragments.
///
/// # Errors
/// Returns [`CoreError::MalformedInput`] when any item lacks an answer, or when the
/// archetype table has no entry for the winning slot.
pub fn score(
    answers: &AnswerSet,
    items: &[QuestionnaireItem],
    archetypes: &ArchetypeTable,
) -> Result<ResultFragment, CoreError> {
    let mut sums = ScoreVector::zeroed();
    let mut counts = ScoreVector::zeroed();
    let mut missing = Vec::new();

    for item in items {
        counts.add(item.type_slot, 1);
        match answers.get(item.id) {
            Some(value) => sums.add(item.type_slot, u32::from(value)),
            None => missing.push(item.id),
        }
    }

    if !missing.is_empty() {
        let ids = missing.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
        return Err(CoreError::MalformedInput(format!(
            "answer set is incomplete; missing items: {ids}"
        )));
    }

    let best = sums.best_slot();
    let profile = archetypes.profile(best)?;
    let raw_score = sums.get(best);
    let wing = |slot: TypeSlot| Wing {
        type_slot: slot,
        percent: affinity_percent(sums.get(slot), counts.get(slot)),
    };
    let wings = [wing(best.left_wing()), wing(best.right_wing())];

    Ok(ResultFragment {
        type_slot: best,
        type_name: profile.name.clone(),
        archetype: profile.archetype.clone(),
        affinity_percent: affinity_percent(raw_score, counts.get(best)),
        raw_score,
        sums,
        counts,
        wings,
        strengths: profile.strengths.clone(),
        weaknesses: profile.weaknesses.clone(),
    })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::questionnaire::{Questionnaire, TypeProfile};

    fn slot(value: u8) -> TypeSlot {
        match TypeSlot::new(value) {
            Ok(slot) => slot,
            Err(err) => panic!("invalid fixture slot {value}: {err}"),
        }
    }

    fn fixture_table() -> ArchetypeTable {
        ArchetypeTable::new(
            TypeSlot::all()
                .map(|slot| {
                    (
                        slot,
                        TypeProfile {
                            name: format!("Type {slot}"),
                            archetype: format!("Archetype {slot}"),
                            strengths: vec![],
                            weaknesses: vec![],
                        },
                    )
                })
                .collect(),
        )
    }

    /// Two items per slot; item ids `2 * slot - 1` and `2 * slot`.
    fn two_per_slot() -> Vec<QuestionnaireItem> {
        TypeSlot::all()
            .flat_map(|slot| {
                let base = u32::from(slot.get()) * 2;
                [base - 1, base].into_iter().map(move |id| QuestionnaireItem {
                    id,
                    text: format!("item {id}"),
                    type_slot: slot,
                })
            })
            .collect()
    }

    fn answers_by_slot(
        items: &[QuestionnaireItem],
        value_for: impl Fn(TypeSlot) -> u8,
    ) -> AnswerSet {
        let mut answers = AnswerSet::new();
        for item in items {
            if let Err(err) = answers.insert(item.id, value_for(item.type_slot)) {
                panic!("fixture answer should be valid: {err}");
            }
        }
        answers
    }

    fn must_score(answers: &AnswerSet, items: &[QuestionnaireItem]) -> ResultFragment {
        match score(answers, items, &fixture_table()) {
            Ok(fragment) => fragment,
            Err(err) => panic!("scoring should succeed: {err}"),
        }
    }

    #[test]
    fn incomplete_answer_set_is_rejected() {
        let items = two_per_slot();
        let answered: Vec<_> =
            items.iter().filter(|item| item.type_slot != slot(7)).cloned().collect();
        let answers = answers_by_slot(&answered, |_| 3);

        let err = match score(&answers, &items, &fixture_table()) {
            Ok(_) => panic!("incomplete answers must not be scored"),
            Err(err) => err,
        };
        assert_eq!(
            err,
            CoreError::MalformedInput("answer set is incomplete; missing items: 13,14".to_string())
        );
    }

    #[test]
    fn tie_between_slots_two_and_five_selects_two() {
        let items = two_per_slot();
        let answers =
            answers_by_slot(&items, |slot| if matches!(slot.get(), 2 | 5) { 5 } else { 2 });
        let fragment = must_score(&answers, &items);
        assert_eq!(fragment.type_slot, slot(2));
        assert_eq!(fragment.raw_score, 10);
        assert_eq!(fragment.affinity_percent, 100);
    }

    #[test]
    fn eighteen_item_scenario_picks_lowest_tied_slot() {
        let items = two_per_slot();
        let answers = answers_by_slot(&items, |slot| if slot.get() == 3 { 4 } else { 5 });
        let fragment = must_score(&answers, &items);
        assert_eq!(fragment.type_slot, slot(1));
        assert_eq!(fragment.raw_score, 10);
        assert_eq!(fragment.affinity_percent, 100);
        assert_eq!(fragment.sums.get(slot(3)), 8);
        assert_eq!(fragment.wings[0], Wing { type_slot: slot(9), percent: 100 });
        assert_eq!(fragment.wings[1], Wing { type_slot: slot(2), percent: 100 });
    }

    #[test]
    fn wings_wrap_for_slot_nine() {
        let items = two_per_slot();
        let answers = answers_by_slot(&items, |slot| match slot.get() {
            9 => 5,
            8 => 4,
            1 => 1,
            _ => 2,
        });
        let fragment = must_score(&answers, &items);
        assert_eq!(fragment.type_slot, slot(9));
        assert_eq!(fragment.wings[0], Wing { type_slot: slot(8), percent: 80 });
        assert_eq!(fragment.wings[1], Wing { type_slot: slot(1), percent: 20 });
    }

    #[test]
    fn affinity_rounds_half_up_and_guards_empty_slots() {
        assert_eq!(affinity_percent(7, 2), 70);
        // 3 / 10 * 100 = 30; 1 / 15 * 100 = 6.67 -> 7; 1 / 40 * 100 = 2.5 -> 3
        assert_eq!(affinity_percent(3, 2), 30);
        assert_eq!(affinity_percent(1, 3), 7);
        assert_eq!(affinity_percent(1, 8), 3);
        assert_eq!(affinity_percent(0, 0), 0);
        assert_eq!(affinity_percent(4, 0), 100);
    }

    #[test]
    fn slots_without_items_score_zero_and_never_divide_by_zero() {
        let items = vec![
            QuestionnaireItem { id: 1, text: "only item".to_string(), type_slot: slot(4) },
        ];
        let answers = answers_by_slot(&items, |_| 3);
        let fragment = must_score(&answers, &items);
        assert_eq!(fragment.type_slot, slot(4));
        assert_eq!(fragment.affinity_percent, 60);
        assert_eq!(fragment.wings[0], Wing { type_slot: slot(3), percent: 0 });
        assert_eq!(fragment.wings[1], Wing { type_slot: slot(5), percent: 0 });
        assert_eq!(fragment.counts.get(slot(3)), 0);
    }

    #[test]
    fn missing_archetype_for_winning_slot_is_a_configuration_error() {
        let items = two_per_slot();
        let answers = answers_by_slot(&items, |slot| if slot.get() == 6 { 5 } else { 1 });
        let table = ArchetypeTable::new(BTreeMap::new());
        let result = score(&answers, &items, &table);
        assert!(matches!(
            result,
            Err(CoreError::MalformedInput(message)) if message.contains("type slot 6")
        ));
    }

    #[test]
    fn builtin_questionnaire_uses_profile_details() {
        let questionnaire = match Questionnaire::builtin() {
            Ok(questionnaire) => questionnaire,
            Err(err) => panic!("{err}"),
        };
        let answers =
            answers_by_slot(questionnaire.items(), |slot| if slot.get() == 5 { 5 } else { 2 });
        let fragment = match questionnaire.score(&answers) {
            Ok(fragment) => fragment,
            Err(err) => panic!("{err}"),
        };
        assert_eq!(fragment.type_slot, slot(5));
        assert_eq!(fragment.type_name, "Tipo 5");
        assert_eq!(fragment.archetype, "O Investigador");
        assert_eq!(fragment.strengths.len(), 2);
    }

    #[test]
    fn fragment_json_round_trips_with_slot_keys() {
        let items = two_per_slot();
        let answers = answers_by_slot(&items, |slot| slot.get().min(5));
        let fragment = must_score(&answers, &items);
        let json = serde_json::to_string(&fragment).unwrap_or_else(|err| panic!("{err}"));
        assert!(json.contains("\"sums\":{\"1\":2"));
        let decoded: ResultFragment =
            serde_json::from_str(&json).unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(decoded, fragment);
    }

    fn answer_values() -> impl Strategy<Value = Vec<u8>> {
        proptest::collection::vec(1_u8..=5, 18)
    }

    proptest! {
        #[test]
        fn property_scoring_is_deterministic(values in answer_values()) {
            let items = two_per_slot();
            let mut answers = AnswerSet::new();
            for (item, value) in items.iter().zip(values.iter()) {
                prop_assert!(answers.insert(item.id, *value).is_ok());
            }
            let first = score(&answers, &items, &fixture_table());
            let second = score(&answers, &items, &fixture_table());
            prop_assert!(first.is_ok());
            prop_assert_eq!(first, second);
        }

        #[test]
        fn property_percentages_are_bounded(values in answer_values()) {
            let items = two_per_slot();
            let mut answers = AnswerSet::new();
            for (item, value) in items.iter().zip(values.iter()) {
                prop_assert!(answers.insert(item.id, *value).is_ok());
            }
            let fragment = score(&answers, &items, &fixture_table())
                .unwrap_or_else(|err| panic!("{err}"));
            prop_assert!(fragment.affinity_percent <= 100);
            prop_assert!(fragment.wings.iter().all(|wing| wing.percent <= 100));
        }

        #[test]
        fn property_best_slot_is_lowest_maximum(values in answer_values()) {
            let items = two_per_slot();
            let mut answers = AnswerSet::new();
            for (item, value) in items.iter().zip(values.iter()) {
                prop_assert!(answers.insert(item.id, *value).is_ok());
            }
            let fragment = score(&answers, &items, &fixture_table())
                .unwrap_or_else(|err| panic!("{err}"));
            let max = TypeSlot::all().map(|slot| fragment.sums.get(slot)).max().unwrap_or(0);
            let expected = TypeSlot::all().find(|slot| fragment.sums.get(*slot) == max);
            prop_assert_eq!(Some(fragment.type_slot), expected);
            prop_assert_eq!(fragment.raw_score, max);
            prop_assert_eq!(fragment.wings[0].type_slot, fragment.type_slot.left_wing());
            prop_assert_eq!(fragment.wings[1].type_slot, fragment.type_slot.right_wing());
        }
    }
}
