use proptest::prelude::*;

use survey_spec::{EntityStore, QuestionOwner, QuestionSpec};

#[derive(Debug, Clone)]
enum Op {
    Add(Option<usize>),
    Remove(usize),
    MoveOut(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        proptest::option::of(0usize..8).prop_map(Op::Add),
        (0usize..8).prop_map(Op::Remove),
        (0usize..8).prop_map(Op::MoveOut),
    ]
}

proptest! {
    #[test]
    fn page_question_order_stays_contiguous(ops in proptest::collection::vec(op(), 1..40)) {
        let mut store = EntityStore::new();
        let page = store.create_page(None, None, false).unwrap();
        let other = store.create_page(None, None, false).unwrap();
        let mut expected = Vec::new();

        for (step, op) in ops.into_iter().enumerate() {
            match op {
                Op::Add(order) => {
                    let spec = QuestionSpec::text(format!("q{}", step));
                    let id = store
                        .create_question(&spec, Some(QuestionOwner::Page(page)), order)
                        .unwrap();
                    let index = order.unwrap_or(expected.len()).min(expected.len());
                    expected.insert(index, id);
                }
                Op::Remove(index) if !expected.is_empty() => {
                    let id = expected.remove(index % expected.len());
                    store.assign_question(id, None, None).unwrap();
                }
                Op::MoveOut(index) if !expected.is_empty() => {
                    let id = expected.remove(index % expected.len());
                    store
                        .assign_question(id, Some(QuestionOwner::Page(other)), None)
                        .unwrap();
                }
                _ => {}
            }

            let rendered = store.render_order(page).unwrap();
            let ids: Vec<_> = rendered.iter().map(|question| question.id()).collect();
            let orders: Vec<_> = rendered.iter().map(|question| question.order()).collect();
            prop_assert_eq!(&ids, &expected);
            prop_assert_eq!(orders, (0..expected.len()).collect::<Vec<_>>());

            let moved: Vec<_> = store
                .render_order(other)
                .unwrap()
                .iter()
                .map(|question| question.order())
                .collect();
            prop_assert_eq!(moved.clone(), (0..moved.len()).collect::<Vec<_>>());
        }
    }

    #[test]
    fn choice_values_follow_text_until_overridden(
        edits in proptest::collection::vec("[a-z]{1,6}", 1..6),
        pin_value in any::<bool>(),
    ) {
        let mut choice = survey_spec::Choice::new(survey_spec::ChoiceId(1), "start");
        if pin_value {
            choice.set_value(Some(serde_json::json!("pinned")));
        }
        for text in &edits {
            choice.set_text(text.clone());
        }
        let last = edits.last().unwrap();
        prop_assert_eq!(choice.label(), last.as_str());
        if pin_value {
            prop_assert_eq!(choice.value(), &serde_json::json!("pinned"));
        } else {
            prop_assert_eq!(choice.value(), &serde_json::json!(last));
        }
    }
}
