//! One-time token registry for a hosting round.
//!
//! Each student of the prepared class gets a six-digit numeric token.  The
//! registry is rebuilt wholesale every time hosting is prepared, so tokens from
//! a previous round stop working immediately.  Within a round a token can be
//! reused to reconnect after a dropped connection.
//!
//! Tokens are drawn from the OS random source.  A draw that collides with a
//! token already issued in the same round is discarded and redrawn, so every
//! token of a round is unique.

use std::collections::HashMap;

use rand::rngs::OsRng;
use rand::Rng;
use tracing::warn;

use crate::application::content::Student;

/// Number of distinct six-digit tokens.
const TOKEN_SPACE: u32 = 1_000_000;

/// The student a token was issued to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHolder {
    pub token: String,
    pub student_id: i64,
    pub first_name: String,
    pub last_name: String,
}

impl TokenHolder {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Token → student map for the current round.
#[derive(Debug, Default)]
pub struct TokenRegistry {
    by_token: HashMap<String, usize>,
    /// Holders in the order the students were supplied.
    holders: Vec<TokenHolder>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the registry with fresh tokens for `students`.
    pub fn regenerate(&mut self, students: &[Student]) -> Vec<TokenHolder> {
        self.regenerate_with(students, &mut OsRng)
    }

    /// Same as [`TokenRegistry::regenerate`] with a caller-supplied random
    /// source.
    pub fn regenerate_with<R: Rng + ?Sized>(&mut self, students: &[Student], rng: &mut R) -> Vec<TokenHolder> {
        self.clear();

        let capacity = TOKEN_SPACE as usize;
        if students.len() > capacity {
            warn!(
                "class has {} students but only {capacity} distinct tokens exist; extra students get none",
                students.len()
            );
        }

        for student in students.iter().take(capacity) {
            let token = loop {
                let candidate = format!("{:06}", rng.gen_range(0..TOKEN_SPACE));
                if !self.by_token.contains_key(&candidate) {
                    break candidate;
                }
            };
            self.by_token.insert(token.clone(), self.holders.len());
            self.holders.push(TokenHolder {
                token,
                student_id: student.id,
                first_name: student.first_name.clone(),
                last_name: student.last_name.clone(),
            });
        }
        self.holders.clone()
    }

    /// Looks up who holds `token`.
    pub fn lookup(&self, token: &str) -> Option<&TokenHolder> {
        self.by_token.get(token).map(|&i| &self.holders[i])
    }

    /// All holders of the current round, in class order.
    pub fn entries(&self) -> &[TokenHolder] {
        &self.holders
    }

    pub fn len(&self) -> usize {
        self.holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }

    /// Invalidates every token.
    pub fn clear(&mut self) {
        self.by_token.clear();
        self.holders.clear();
    }
}
