//! Shuffled pair-deck generation.

use rand::seq::SliceRandom;

/// Pairs dealt into a room when no override is configured.
pub const DEFAULT_PAIRS: usize = 8;

/// One card of the deck.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    /// Position of the card in the deck, assigned after shuffling.
    pub id: usize,
    /// Pair value; exactly two cards share each value.
    pub value: String,
    /// Whether the card is currently face-up.
    pub revealed: bool,
    /// Whether the card belongs to a resolved pair. Matched cards are never
    /// mutated again.
    pub matched: bool,
}

/// Build a deck of `2 * pairs` cards, each value appearing exactly twice,
/// uniformly shuffled (Fisher-Yates via [`SliceRandom::shuffle`]).
pub fn build_deck(pairs: usize) -> Vec<Card> {
    let mut values: Vec<String> = (0..pairs)
        .flat_map(|i| {
            let value = format!("card_{i}");
            [value.clone(), value]
        })
        .collect();
    values.shuffle(&mut rand::rng());

    values
        .into_iter()
        .enumerate()
        .map(|(id, value)| Card {
            id,
            value,
            revealed: false,
            matched: false,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn deck_has_two_of_each_value() {
        let deck = build_deck(DEFAULT_PAIRS);
        assert_eq!(deck.len(), DEFAULT_PAIRS * 2);

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for card in &deck {
            *counts.entry(card.value.as_str()).or_default() += 1;
        }
        assert_eq!(counts.len(), DEFAULT_PAIRS);
        assert!(counts.values().all(|&count| count == 2));
    }

    #[test]
    fn deck_ids_follow_positions_and_cards_start_face_down() {
        let deck = build_deck(3);
        for (index, card) in deck.iter().enumerate() {
            assert_eq!(card.id, index);
            assert!(!card.revealed);
            assert!(!card.matched);
        }
    }

    #[test]
    fn empty_deck_is_allowed() {
        assert!(build_deck(0).is_empty());
    }
}
