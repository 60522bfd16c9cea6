use criterion::{criterion_group, criterion_main, Criterion};
use enneagram_core::{
    score, AnswerSet, ArchetypeTable, Questionnaire, QuestionnaireItem, TypeProfile, TypeSlot,
};

fn mk_answers(items: &[QuestionnaireItem]) -> AnswerSet {
    let mut answers = AnswerSet::new();
    for item in items {
        let value = u8::try_from(item.id % 5).unwrap_or(0) + 1;
        if let Err(err) = answers.insert(item.id, value) {
            panic!("benchmark answer fixture failed: {err}");
        }
    }
    answers
}

fn mk_large_items(count: u32) -> Vec<QuestionnaireItem> {
    let slots = TypeSlot::all().collect::<Vec<_>>();
    (1..=count)
        .map(|id| QuestionnaireItem {
            id,
            text: format!("benchmark item {id}"),
            type_slot: slots[(id as usize) % slots.len()],
        })
        .collect()
}

fn mk_table() -> ArchetypeTable {
    ArchetypeTable::new(
        TypeSlot::all()
            .map(|slot| {
                (
                    slot,
                    TypeProfile {
                        name: format!("Type {slot}"),
                        archetype: format!("Bench archetype {slot}"),
                        strengths: Vec::new(),
                        weaknesses: Vec::new(),
                    },
                )
            })
            .collect(),
    )
}

fn bench_builtin(c: &mut Criterion) {
    let questionnaire = match Questionnaire::builtin() {
        Ok(questionnaire) => questionnaire,
        Err(err) => panic!("builtin questionnaire failed: {err}"),
    };
    let answers = mk_answers(questionnaire.items());

    c.bench_function("score_builtin_18_items", |b| {
        b.iter(|| {
            if let Err(err) = questionnaire.score(&answers) {
                panic!("builtin scoring failed: {err}");
            }
        });
    });
}

fn bench_large(c: &mut Criterion) {
    let items = mk_large_items(1_000);
    let answers = mk_answers(&items);
    let table = mk_table();

    c.bench_function("score_1000_items", |b| {
        b.iter(|| {
            if let Err(err) = score(&answers, &items, &table) {
                panic!("large scoring failed: {err}");
            }
        });
    });
}

criterion_group!(scoring_benches, bench_builtin, bench_large);
criterion_main!(scoring_benches);
