//! Property test for the Directive Parser's chunk-boundary invariance
//!.

use termsup::directives::{parse_chunk, CarryStore, RecentStore, DEFAULT_DEDUPE_WINDOW};

fn two_directives() -> Vec<u8> {
    [
        br#"FYP_DISPATCH_JSON: {"target":"worker:Worker A","text":"ONE","interrupt":false}"#
            .as_slice(),
        br#"FYP_SEND_TASK_JSON: {"target":"worker:Worker B","task":"TWO","initialize":true}"#
            .as_slice(),
    ]
    .concat()
}

fn parse_whole(chunk: &[u8]) -> (usize, usize) {
    let mut carry = CarryStore::new();
    let mut recent = RecentStore::new();
    let out = parse_chunk("whole", chunk, &mut carry, &mut recent, DEFAULT_DEDUPE_WINDOW);
    (out.dispatches.len(), out.question_answers.len())
}

fn parse_split_at(chunk: &[u8], at: usize) -> (usize, usize) {
    let mut carry = CarryStore::new();
    let mut recent = RecentStore::new();
    let (head, tail) = chunk.split_at(at);
    let first = parse_chunk("split", head, &mut carry, &mut recent, DEFAULT_DEDUPE_WINDOW);
    let second = parse_chunk("split", tail, &mut carry, &mut recent, DEFAULT_DEDUPE_WINDOW);
    (
        first.dispatches.len() + second.dispatches.len(),
        first.question_answers.len() + second.question_answers.len(),
    )
}

#[test]
fn two_concatenated_directives_always_yield_two_outputs() {
    let chunk = two_directives();
    let (dispatches, answers) = parse_whole(&chunk);
    assert_eq!(dispatches, 2);
    assert_eq!(answers, 0);
}

#[test]
fn splitting_at_any_single_index_yields_the_same_two_outputs() {
    let chunk = two_directives();
    let expected = parse_whole(&chunk);
    for at in 0..=chunk.len() {
        let got = parse_split_at(&chunk, at);
        assert_eq!(
            got, expected,
            "split at byte {at} produced {got:?}, expected {expected:?}"
        );
    }
}

#[test]
fn splitting_a_single_directive_at_any_index_eventually_completes() {
    let chunk = br#"FYP_ANSWER_QUESTION_JSON: {"attentionId":7,"optionId":"1"}"#.to_vec();
    for at in 0..=chunk.len() {
        let got = parse_split_at(&chunk, at);
        assert_eq!(got, (0, 1), "split at byte {at} produced {got:?}");
    }
}
