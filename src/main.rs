// Werewolf logic-puzzle synthesis engine
//
// Generates village puzzles with a SAT-verified unique solution: each
// villager utters one or more boolean statements about who is a werewolf.
// Truth-tellers are always right, werewolves always utter at least one
// falsehood, and in shill mode a single paid non-werewolf lies as well.
//
// Current limitations:
//
// - Werewolves are pure liars (every bundle they utter contains at least one
//   false statement). A "wolves must also say one true thing" rule would need
//   a second per-speaker mask intersected during generation.
//   TODO: add a some-true mask once bundles regularly grow beyond size 2.
//
// - Count-statement scopes are exactly the indices named in the code,
//   independent of who speaks them. Scopes defined relative to the speaker
//   ("everyone but me") would get their own code letters; existing codes
//   stay fixed.
//
// - AssignmentSet allocates a fresh word vector for every mask operation.
//   Fine up to N=12 or so; past that the greedy inner loop would want
//   in-place buffers.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rustsat::instances::{BasicVarManager, Cnf, SatInstance};
use rustsat::solvers::{Solve, SolverResult};
use rustsat::types::{Clause, Lit, TernaryVal};
use thiserror::Error;

// ===== ERROR TAXONOMY =====

#[derive(Debug, Error)]
enum Error {
    #[error("malformed statement code `{code}`: {reason}")]
    MalformedCode { code: String, reason: String },

    #[error("malformed puzzle code: {0}")]
    MalformedPuzzle(String),

    #[error("villager index {index} out of range for {n} villagers")]
    OutOfRangeIndex { index: usize, n: u8 },

    #[error("pair statement `{0}` is not in canonical a<b order")]
    NonCanonicalPair(String),

    #[error("truth cache incompatible: {0}")]
    CacheIncompatible(String),

    #[error("no unique puzzle found within {attempts} attempts")]
    GenerationExhausted { attempts: u32 },

    #[error("verifier inconsistency: {0}")]
    VerifierInconsistency(String),

    #[error("verifier timed out after {0:?}")]
    VerifierTimeout(Duration),

    #[error("puzzle admits {models} solutions where exactly one was required")]
    NotUniquelySolvable { models: usize },

    #[error("{0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

// ===== ROLE VECTORS AND ASSIGNMENT SETS =====

/// One concrete role assignment: bit i set means villager i is a werewolf.
/// The raw bits double as the assignment's index into every 2^N mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RoleVector {
    bits: u32,
    n: u8,
}

impl RoleVector {
    fn from_index(index: usize, n: u8) -> Self {
        RoleVector {
            bits: index as u32,
            n,
        }
    }

    #[allow(dead_code)]
    fn index(&self) -> usize {
        self.bits as usize
    }

    fn is_werewolf(&self, villager: u8) -> bool {
        self.bits >> villager & 1 == 1
    }

    fn werewolf_count(&self) -> u32 {
        self.bits.count_ones()
    }

    fn werewolves_in(&self, scope: &[u8]) -> u32 {
        scope.iter().filter(|&&i| self.is_werewolf(i)).count() as u32
    }

    fn wolves(&self) -> impl Iterator<Item = u8> + '_ {
        (0..self.n).filter(|&i| self.is_werewolf(i))
    }
}

/// A set of assignment indices for N villagers, i.e. a 2^N-bit mask.
/// N<=6 fits one word; the word vector carries larger villages.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AssignmentSet {
    words: Vec<u64>,
    bits: usize,
}

impl AssignmentSet {
    fn empty(n: u8) -> Self {
        let bits = 1usize << n;
        AssignmentSet {
            words: vec![0; bits.div_ceil(64)],
            bits,
        }
    }

    fn full(n: u8) -> Self {
        let mut set = Self::empty(n);
        for word in &mut set.words {
            *word = u64::MAX;
        }
        set.mask_tail();
        set
    }

    // Clear bits past the 2^N domain in the last word.
    fn mask_tail(&mut self) {
        let rem = self.bits % 64;
        if rem != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << rem) - 1;
            }
        }
    }

    fn contains(&self, index: usize) -> bool {
        self.words[index / 64] >> (index % 64) & 1 == 1
    }

    fn insert(&mut self, index: usize) {
        self.words[index / 64] |= 1u64 << (index % 64);
    }

    fn remove(&mut self, index: usize) {
        self.words[index / 64] &= !(1u64 << (index % 64));
    }

    fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    fn intersection(&self, other: &AssignmentSet) -> AssignmentSet {
        let words = self
            .words
            .iter()
            .zip(&other.words)
            .map(|(a, b)| a & b)
            .collect();
        AssignmentSet {
            words,
            bits: self.bits,
        }
    }

    fn union(&self, other: &AssignmentSet) -> AssignmentSet {
        let words = self
            .words
            .iter()
            .zip(&other.words)
            .map(|(a, b)| a | b)
            .collect();
        AssignmentSet {
            words,
            bits: self.bits,
        }
    }

    /// Complement within the 2^N domain.
    fn complement(&self) -> AssignmentSet {
        let words = self.words.iter().map(|w| !w).collect();
        let mut set = AssignmentSet {
            words,
            bits: self.bits,
        };
        set.mask_tail();
        set
    }

    fn is_disjoint(&self, other: &AssignmentSet) -> bool {
        self.words.iter().zip(&other.words).all(|(a, b)| a & b == 0)
    }

    fn is_subset_of(&self, other: &AssignmentSet) -> bool {
        self.words
            .iter()
            .zip(&other.words)
            .all(|(a, b)| a & !b == 0)
    }

    /// The single member, if the set holds exactly one.
    fn sole_member(&self) -> Option<usize> {
        let mut found = None;
        for (wi, &word) in self.words.iter().enumerate() {
            if word == 0 {
                continue;
            }
            if word.count_ones() > 1 || found.is_some() {
                return None;
            }
            found = Some(wi * 64 + word.trailing_zeros() as usize);
        }
        found
    }

    /// Big-endian hex, zero-padded to ceil(2^N / 4) digits.
    fn to_hex(&self) -> String {
        let nibbles = self.bits.div_ceil(4);
        let mut out = String::with_capacity(nibbles);
        for k in (0..nibbles).rev() {
            let bit = k * 4;
            let nibble = (self.words[bit / 64] >> (bit % 64)) & 0xF;
            out.push(
                char::from_digit(nibble as u32, 16)
                    .unwrap()
                    .to_ascii_uppercase(),
            );
        }
        out
    }

    fn from_hex(s: &str, n: u8) -> Result<Self, Error> {
        let mut set = Self::empty(n);
        let nibbles = set.bits.div_ceil(4);
        if s.len() != nibbles {
            return Err(Error::CacheIncompatible(format!(
                "mask `{s}` has {} hex digits, expected {nibbles}",
                s.len()
            )));
        }
        for (k, ch) in s.chars().rev().enumerate() {
            let nibble = ch
                .to_digit(16)
                .ok_or_else(|| Error::CacheIncompatible(format!("bad hex digit `{ch}`")))?
                as u64;
            let bit = k * 4;
            set.words[bit / 64] |= nibble << (bit % 64);
        }
        Ok(set)
    }
}

// ===== STATEMENT MODEL =====

/// The closed set of statement shapes a villager can utter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum StatementKind {
    Implication,
    Equivalence,
    Disjunction,
    ExclusiveOne,
    AtMostOnePair,
    ConverseImplication,
    NeitherPair,
    ExactCount,
    UpperBound,
    LowerBound,
    EvenParity,
    OddParity,
}

impl StatementKind {
    const fn all() -> &'static [StatementKind] {
        &[
            StatementKind::Implication,
            StatementKind::Equivalence,
            StatementKind::Disjunction,
            StatementKind::ExclusiveOne,
            StatementKind::AtMostOnePair,
            StatementKind::ConverseImplication,
            StatementKind::NeitherPair,
            StatementKind::ExactCount,
            StatementKind::UpperBound,
            StatementKind::LowerBound,
            StatementKind::EvenParity,
            StatementKind::OddParity,
        ]
    }

    const fn letter(&self) -> char {
        match self {
            StatementKind::Implication => 'I',
            StatementKind::Equivalence => 'B',
            StatementKind::Disjunction => 'A',
            StatementKind::ExclusiveOne => 'X',
            StatementKind::AtMostOnePair => 'T',
            StatementKind::ConverseImplication => 'F',
            StatementKind::NeitherPair => 'N',
            StatementKind::ExactCount => 'E',
            StatementKind::UpperBound => 'M',
            StatementKind::LowerBound => 'L',
            StatementKind::EvenParity => 'V',
            StatementKind::OddParity => 'O',
        }
    }

    const fn name(&self) -> &'static str {
        match self {
            StatementKind::Implication => "implication",
            StatementKind::Equivalence => "equivalence",
            StatementKind::Disjunction => "disjunction",
            StatementKind::ExclusiveOne => "exclusive-one",
            StatementKind::AtMostOnePair => "at-most-one",
            StatementKind::ConverseImplication => "converse-implication",
            StatementKind::NeitherPair => "neither",
            StatementKind::ExactCount => "exact-count",
            StatementKind::UpperBound => "upper-bound",
            StatementKind::LowerBound => "lower-bound",
            StatementKind::EvenParity => "even-parity",
            StatementKind::OddParity => "odd-parity",
        }
    }

    const fn is_count(&self) -> bool {
        matches!(
            self,
            StatementKind::ExactCount
                | StatementKind::UpperBound
                | StatementKind::LowerBound
                | StatementKind::EvenParity
                | StatementKind::OddParity
        )
    }

    /// Commutative pair kinds are stored and encoded with a < b.
    const fn is_commutative_pair(&self) -> bool {
        matches!(
            self,
            StatementKind::Equivalence
                | StatementKind::ExclusiveOne
                | StatementKind::Disjunction
                | StatementKind::AtMostOnePair
                | StatementKind::NeitherPair
        )
    }

    fn from_name(name: &str) -> Option<StatementKind> {
        StatementKind::all().iter().copied().find(|k| k.name() == name)
    }
}

/// A boolean statement over the role vector. Pair variants talk about two
/// villagers; count variants about the werewolf total in a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Statement {
    /// W[a] => W[b]
    Implies { a: u8, b: u8 },
    /// W[a] == W[b]
    BothOrNeither { a: u8, b: u8 },
    /// W[a] or W[b]
    AtLeastOne { a: u8, b: u8 },
    /// W[a] xor W[b]
    ExactlyOne { a: u8, b: u8 },
    /// not (W[a] and W[b])
    AtMostOne { a: u8, b: u8 },
    /// not W[a] => W[b]
    IfNotThen { a: u8, b: u8 },
    /// not W[a] and not W[b]
    Neither { a: u8, b: u8 },
    /// werewolves in scope == count
    ExactCount { scope: Vec<u8>, count: u8 },
    /// werewolves in scope <= count
    AtMostCount { scope: Vec<u8>, count: u8 },
    /// werewolves in scope >= count
    AtLeastCount { scope: Vec<u8>, count: u8 },
    /// werewolves in scope is even
    EvenCount { scope: Vec<u8> },
    /// werewolves in scope is odd
    OddCount { scope: Vec<u8> },
}

fn malformed(code: &str, reason: impl Into<String>) -> Error {
    Error::MalformedCode {
        code: code.to_string(),
        reason: reason.into(),
    }
}

fn parse_villager_index(part: &str, code: &str, n: u8) -> Result<u8, Error> {
    let value: usize = part
        .parse()
        .map_err(|_| malformed(code, format!("`{part}` is not a villager index")))?;
    if value >= n as usize {
        return Err(Error::OutOfRangeIndex { index: value, n });
    }
    Ok(value as u8)
}

fn parse_scope(part: &str, code: &str, n: u8) -> Result<Vec<u8>, Error> {
    if part.is_empty() {
        return Err(malformed(code, "empty scope"));
    }
    let mut scope = Vec::new();
    for piece in part.split('.') {
        let index = parse_villager_index(piece, code, n)?;
        if let Some(&last) = scope.last() {
            if index <= last {
                return Err(malformed(
                    code,
                    "scope indices must be distinct and strictly increasing",
                ));
            }
        }
        scope.push(index);
    }
    Ok(scope)
}

fn join_scope(scope: &[u8]) -> String {
    scope
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

impl Statement {
    fn kind(&self) -> StatementKind {
        match self {
            Statement::Implies { .. } => StatementKind::Implication,
            Statement::BothOrNeither { .. } => StatementKind::Equivalence,
            Statement::AtLeastOne { .. } => StatementKind::Disjunction,
            Statement::ExactlyOne { .. } => StatementKind::ExclusiveOne,
            Statement::AtMostOne { .. } => StatementKind::AtMostOnePair,
            Statement::IfNotThen { .. } => StatementKind::ConverseImplication,
            Statement::Neither { .. } => StatementKind::NeitherPair,
            Statement::ExactCount { .. } => StatementKind::ExactCount,
            Statement::AtMostCount { .. } => StatementKind::UpperBound,
            Statement::AtLeastCount { .. } => StatementKind::LowerBound,
            Statement::EvenCount { .. } => StatementKind::EvenParity,
            Statement::OddCount { .. } => StatementKind::OddParity,
        }
    }

    fn pair(kind: StatementKind, a: u8, b: u8) -> Statement {
        match kind {
            StatementKind::Implication => Statement::Implies { a, b },
            StatementKind::Equivalence => Statement::BothOrNeither { a, b },
            StatementKind::Disjunction => Statement::AtLeastOne { a, b },
            StatementKind::ExclusiveOne => Statement::ExactlyOne { a, b },
            StatementKind::AtMostOnePair => Statement::AtMostOne { a, b },
            StatementKind::ConverseImplication => Statement::IfNotThen { a, b },
            StatementKind::NeitherPair => Statement::Neither { a, b },
            _ => panic!("{:?} is not a pair kind", kind),
        }
    }

    /// Pure, total evaluation on one concrete assignment.
    fn evaluate(&self, w: RoleVector) -> bool {
        match self {
            Statement::Implies { a, b } => !w.is_werewolf(*a) || w.is_werewolf(*b),
            Statement::BothOrNeither { a, b } => w.is_werewolf(*a) == w.is_werewolf(*b),
            Statement::AtLeastOne { a, b } => w.is_werewolf(*a) || w.is_werewolf(*b),
            Statement::ExactlyOne { a, b } => w.is_werewolf(*a) != w.is_werewolf(*b),
            Statement::AtMostOne { a, b } => !(w.is_werewolf(*a) && w.is_werewolf(*b)),
            Statement::IfNotThen { a, b } => w.is_werewolf(*a) || w.is_werewolf(*b),
            Statement::Neither { a, b } => !w.is_werewolf(*a) && !w.is_werewolf(*b),
            Statement::ExactCount { scope, count } => w.werewolves_in(scope) == *count as u32,
            Statement::AtMostCount { scope, count } => w.werewolves_in(scope) <= *count as u32,
            Statement::AtLeastCount { scope, count } => w.werewolves_in(scope) >= *count as u32,
            Statement::EvenCount { scope } => w.werewolves_in(scope) % 2 == 0,
            Statement::OddCount { scope } => w.werewolves_in(scope) % 2 == 1,
        }
    }

    /// Canonical code: cache key and wire form, e.g. `I-3-1` or `E-0.1.2-2`.
    fn code(&self) -> String {
        let letter = self.kind().letter();
        match self {
            Statement::Implies { a, b }
            | Statement::BothOrNeither { a, b }
            | Statement::AtLeastOne { a, b }
            | Statement::ExactlyOne { a, b }
            | Statement::AtMostOne { a, b }
            | Statement::IfNotThen { a, b }
            | Statement::Neither { a, b } => format!("{letter}-{a}-{b}"),
            Statement::ExactCount { scope, count }
            | Statement::AtMostCount { scope, count }
            | Statement::AtLeastCount { scope, count } => {
                format!("{letter}-{}-{count}", join_scope(scope))
            }
            Statement::EvenCount { scope } | Statement::OddCount { scope } => {
                format!("{letter}-{}", join_scope(scope))
            }
        }
    }

    /// Strict inverse of `code`.
    fn parse(s: &str, n: u8) -> Result<Statement, Error> {
        let parts: Vec<&str> = s.split('-').collect();
        let kind = match parts[0] {
            "I" => StatementKind::Implication,
            "B" => StatementKind::Equivalence,
            "A" => StatementKind::Disjunction,
            "X" => StatementKind::ExclusiveOne,
            "T" => StatementKind::AtMostOnePair,
            "F" => StatementKind::ConverseImplication,
            "N" => StatementKind::NeitherPair,
            "E" => StatementKind::ExactCount,
            "M" => StatementKind::UpperBound,
            "L" => StatementKind::LowerBound,
            "V" => StatementKind::EvenParity,
            "O" => StatementKind::OddParity,
            other => return Err(malformed(s, format!("unknown statement code `{other}`"))),
        };

        match kind {
            StatementKind::Implication
            | StatementKind::Equivalence
            | StatementKind::Disjunction
            | StatementKind::ExclusiveOne
            | StatementKind::AtMostOnePair
            | StatementKind::ConverseImplication
            | StatementKind::NeitherPair => {
                if parts.len() != 3 {
                    return Err(malformed(s, "pair statements take exactly two indices"));
                }
                let a = parse_villager_index(parts[1], s, n)?;
                let b = parse_villager_index(parts[2], s, n)?;
                if kind.is_commutative_pair() && a >= b {
                    return Err(Error::NonCanonicalPair(s.to_string()));
                }
                Ok(Statement::pair(kind, a, b))
            }
            StatementKind::ExactCount | StatementKind::UpperBound | StatementKind::LowerBound => {
                if parts.len() != 3 {
                    return Err(malformed(s, "count statements take a scope and a count"));
                }
                let scope = parse_scope(parts[1], s, n)?;
                let count: u8 = parts[2]
                    .parse()
                    .map_err(|_| malformed(s, format!("`{}` is not a count", parts[2])))?;
                Ok(match kind {
                    StatementKind::ExactCount => Statement::ExactCount { scope, count },
                    StatementKind::UpperBound => Statement::AtMostCount { scope, count },
                    _ => Statement::AtLeastCount { scope, count },
                })
            }
            StatementKind::EvenParity | StatementKind::OddParity => {
                if parts.len() != 2 {
                    return Err(malformed(s, "parity statements take a scope only"));
                }
                let scope = parse_scope(parts[1], s, n)?;
                Ok(if kind == StatementKind::EvenParity {
                    Statement::EvenCount { scope }
                } else {
                    Statement::OddCount { scope }
                })
            }
        }
    }

    /// Bitmask of villager indices this statement talks about.
    fn mentions(&self) -> u32 {
        match self {
            Statement::Implies { a, b }
            | Statement::BothOrNeither { a, b }
            | Statement::AtLeastOne { a, b }
            | Statement::ExactlyOne { a, b }
            | Statement::AtMostOne { a, b }
            | Statement::IfNotThen { a, b }
            | Statement::Neither { a, b } => 1 << a | 1 << b,
            Statement::ExactCount { scope, .. }
            | Statement::AtMostCount { scope, .. }
            | Statement::AtLeastCount { scope, .. }
            | Statement::EvenCount { scope }
            | Statement::OddCount { scope } => {
                scope.iter().fold(0, |acc, &i| acc | 1 << i)
            }
        }
    }

    /// Search bias only; never part of the semantics.
    fn complexity_cost(&self) -> u32 {
        match self {
            Statement::Implies { .. }
            | Statement::BothOrNeither { .. }
            | Statement::AtLeastOne { .. }
            | Statement::IfNotThen { .. } => 1,
            Statement::ExactlyOne { .. } | Statement::AtMostOne { .. } => 2,
            Statement::Neither { .. } => 3,
            Statement::ExactCount { scope, count }
            | Statement::AtMostCount { scope, count }
            | Statement::AtLeastCount { scope, count } => 2 * scope.len() as u32 + *count as u32,
            Statement::EvenCount { scope } | Statement::OddCount { scope } => {
                2 * scope.len() as u32
            }
        }
    }

    /// English display form for the text renderer.
    fn describe(&self, names: &[String]) -> String {
        let who = |i: &u8| name_of(names, *i);
        match self {
            Statement::Implies { a, b } => format!(
                "If {} is a werewolf, then {} is a werewolf.",
                who(a),
                who(b)
            ),
            Statement::BothOrNeither { a, b } => format!(
                "{} and {} are both werewolves, or neither is.",
                who(a),
                who(b)
            ),
            Statement::AtLeastOne { a, b } => {
                format!("At least one of {} and {} is a werewolf.", who(a), who(b))
            }
            Statement::ExactlyOne { a, b } => {
                format!("Exactly one of {} and {} is a werewolf.", who(a), who(b))
            }
            Statement::AtMostOne { a, b } => {
                format!("At most one of {} and {} is a werewolf.", who(a), who(b))
            }
            Statement::IfNotThen { a, b } => format!(
                "If {} is not a werewolf, then {} is a werewolf.",
                who(a),
                who(b)
            ),
            Statement::Neither { a, b } => {
                format!("Neither {} nor {} is a werewolf.", who(a), who(b))
            }
            Statement::ExactCount { scope, count } => format!(
                "Exactly {count} {} among {}.",
                plural_werewolves(*count),
                scope_phrase(scope, names)
            ),
            Statement::AtMostCount { scope, count } => format!(
                "At most {count} {} among {}.",
                plural_werewolves(*count),
                scope_phrase(scope, names)
            ),
            Statement::AtLeastCount { scope, count } => format!(
                "At least {count} {} among {}.",
                plural_werewolves(*count),
                scope_phrase(scope, names)
            ),
            Statement::EvenCount { scope } => format!(
                "An even number of werewolves among {}.",
                scope_phrase(scope, names)
            ),
            Statement::OddCount { scope } => format!(
                "An odd number of werewolves among {}.",
                scope_phrase(scope, names)
            ),
        }
    }
}

fn plural_werewolves(count: u8) -> &'static str {
    if count == 1 {
        "werewolf"
    } else {
        "werewolves"
    }
}

fn name_of(names: &[String], i: u8) -> String {
    names
        .get(i as usize)
        .cloned()
        .unwrap_or_else(|| format!("Villager {i}"))
}

fn scope_phrase(scope: &[u8], names: &[String]) -> String {
    match scope.len() {
        1 => name_of(names, scope[0]),
        2 => format!("{} and {}", name_of(names, scope[0]), name_of(names, scope[1])),
        3 => format!(
            "{}, {}, and {}",
            name_of(names, scope[0]),
            name_of(names, scope[1]),
            name_of(names, scope[2])
        ),
        len => format!("{len} villagers"),
    }
}

// ===== STATEMENT LIBRARY =====

/// What the library enumerates; the library is a pure function of this.
#[derive(Debug, Clone)]
struct LibraryConfig {
    n: u8,
    kinds: Vec<StatementKind>,
    forbid_self_reference: bool,
    /// Also enumerate count scopes that leave out one villager.
    punctured_scopes: bool,
}

impl LibraryConfig {
    fn standard(n: u8) -> Self {
        LibraryConfig {
            n,
            kinds: StatementKind::all().to_vec(),
            forbid_self_reference: true,
            punctured_scopes: true,
        }
    }

    fn enables(&self, kind: StatementKind) -> bool {
        self.kinds.contains(&kind)
    }
}

#[derive(Debug, Clone)]
struct Library {
    n: u8,
    statements: Vec<Statement>,
}

/// Deterministically enumerate every allowed statement for this village.
fn build_library(config: &LibraryConfig) -> Library {
    let n = config.n;
    let full_scope: Vec<u8> = (0..n).collect();
    let mut statements = Vec::new();

    for kind in StatementKind::all().iter().copied() {
        if !config.enables(kind) {
            continue;
        }
        match kind {
            StatementKind::Implication | StatementKind::ConverseImplication => {
                for a in 0..n {
                    for b in 0..n {
                        if a == b && config.forbid_self_reference {
                            continue;
                        }
                        statements.push(Statement::pair(kind, a, b));
                    }
                }
            }
            StatementKind::Equivalence
            | StatementKind::Disjunction
            | StatementKind::ExclusiveOne
            | StatementKind::AtMostOnePair
            | StatementKind::NeitherPair => {
                for a in 0..n {
                    for b in a + 1..n {
                        statements.push(Statement::pair(kind, a, b));
                    }
                }
            }
            StatementKind::ExactCount => {
                for count in 1..=n {
                    statements.push(Statement::ExactCount {
                        scope: full_scope.clone(),
                        count,
                    });
                }
                if config.punctured_scopes {
                    for scope in punctured_scopes(n) {
                        for count in 1..=scope.len() as u8 {
                            statements.push(Statement::ExactCount {
                                scope: scope.clone(),
                                count,
                            });
                        }
                    }
                }
            }
            StatementKind::UpperBound => {
                for count in 0..=n {
                    statements.push(Statement::AtMostCount {
                        scope: full_scope.clone(),
                        count,
                    });
                }
            }
            StatementKind::LowerBound => {
                for count in 0..=n {
                    statements.push(Statement::AtLeastCount {
                        scope: full_scope.clone(),
                        count,
                    });
                }
            }
            StatementKind::EvenParity => {
                statements.push(Statement::EvenCount {
                    scope: full_scope.clone(),
                });
                if config.punctured_scopes {
                    for scope in punctured_scopes(n) {
                        statements.push(Statement::EvenCount { scope });
                    }
                }
            }
            StatementKind::OddParity => {
                statements.push(Statement::OddCount {
                    scope: full_scope.clone(),
                });
                if config.punctured_scopes {
                    for scope in punctured_scopes(n) {
                        statements.push(Statement::OddCount { scope });
                    }
                }
            }
        }
    }

    Library { n, statements }
}

fn punctured_scopes(n: u8) -> Vec<Vec<u8>> {
    (0..n)
        .map(|v| (0..n).filter(|&i| i != v).collect())
        .filter(|scope: &Vec<u8>| !scope.is_empty())
        .collect()
}

// ===== TRUTH-TABLE CACHE =====

/// Per-speaker role masks, a function of N alone: `human[i]` holds every
/// assignment where villager i is not a werewolf, `wolf[i]` the complement.
struct SpeakerMasks {
    human: Vec<AssignmentSet>,
    wolf: Vec<AssignmentSet>,
    n: u8,
}

impl SpeakerMasks {
    fn build(n: u8) -> Self {
        let mut human = Vec::with_capacity(n as usize);
        let mut wolf = Vec::with_capacity(n as usize);
        for speaker in 0..n {
            let mut h = AssignmentSet::empty(n);
            for index in 0..1usize << n {
                if index >> speaker & 1 == 0 {
                    h.insert(index);
                }
            }
            wolf.push(h.complement());
            human.push(h);
        }
        SpeakerMasks { human, wolf, n }
    }
}

/// code -> truth mask for every statement of a library. Read-only once
/// built; generation and replay share it by reference.
struct TruthCache {
    n: u8,
    masks: BTreeMap<String, AssignmentSet>,
}

impl TruthCache {
    fn build(library: &Library) -> Self {
        let n = library.n;
        let mut masks = BTreeMap::new();
        for statement in &library.statements {
            let mut mask = AssignmentSet::empty(n);
            for index in 0..1usize << n {
                if statement.evaluate(RoleVector::from_index(index, n)) {
                    mask.insert(index);
                }
            }
            masks.insert(statement.code(), mask);
        }
        TruthCache { n, masks }
    }

    fn len(&self) -> usize {
        self.masks.len()
    }

    fn mask(&self, statement: &Statement) -> Result<&AssignmentSet, Error> {
        let code = statement.code();
        self.masks.get(&code).ok_or_else(|| {
            Error::CacheIncompatible(format!("statement `{code}` is not in the cache"))
        })
    }

    /// Every library statement must be cached before generation starts.
    fn covers(&self, library: &Library) -> Result<(), Error> {
        if self.n != library.n {
            return Err(Error::CacheIncompatible(format!(
                "cache is for N={}, library is for N={}",
                self.n, library.n
            )));
        }
        for statement in &library.statements {
            self.mask(statement)?;
        }
        Ok(())
    }

    /// Assignments under which every statement of the bundle holds.
    fn bundle_all_true_mask(&self, bundle: &[Statement]) -> Result<AssignmentSet, Error> {
        let mut mask = AssignmentSet::full(self.n);
        for statement in bundle {
            mask = mask.intersection(self.mask(statement)?);
        }
        Ok(mask)
    }

    fn save(&self, path: &Path) -> Result<(), Error> {
        let mut out = String::new();
        out.push_str(&format!("N={}\n", self.n));
        out.push_str(&format!("count={}\n", self.masks.len()));
        for (code, mask) in &self.masks {
            out.push_str(code);
            out.push(' ');
            out.push_str(&mask.to_hex());
            out.push('\n');
        }
        std::fs::write(path, out)?;
        Ok(())
    }

    fn load(path: &Path, n: u8) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        let mut lines = text.lines();
        let header_n = lines
            .next()
            .and_then(|l| l.strip_prefix("N="))
            .and_then(|v| v.parse::<u8>().ok())
            .ok_or_else(|| Error::CacheIncompatible("missing or bad N= header".to_string()))?;
        if header_n != n {
            return Err(Error::CacheIncompatible(format!(
                "cache file is for N={header_n}, requested N={n}"
            )));
        }
        let count = lines
            .next()
            .and_then(|l| l.strip_prefix("count="))
            .and_then(|v| v.parse::<usize>().ok())
            .ok_or_else(|| Error::CacheIncompatible("missing or bad count= header".to_string()))?;

        let mut masks = BTreeMap::new();
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let (code, hex) = line.split_once(' ').ok_or_else(|| {
                Error::CacheIncompatible(format!("bad cache line `{line}`"))
            })?;
            // Unknown codes are rejected at load time, not at lookup time.
            Statement::parse(code, n)
                .map_err(|e| Error::CacheIncompatible(format!("cache entry `{code}`: {e}")))?;
            masks.insert(code.to_string(), AssignmentSet::from_hex(hex, n)?);
        }
        if masks.len() != count {
            return Err(Error::CacheIncompatible(format!(
                "header claims count={count} but file holds {} entries",
                masks.len()
            )));
        }
        Ok(TruthCache { n, masks })
    }
}

// ===== ROLE SEMANTICS =====

/// One candidate answer: a role assignment plus, in shill mode, who lies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Solution {
    index: usize,
    shill: Option<u8>,
}

impl Solution {
    fn role_vector(&self, n: u8) -> RoleVector {
        RoleVector::from_index(self.index, n)
    }
}

/// Assignments compatible with "speaker i uttered this bundle": honest
/// humans sit inside the bundle's all-true mask, werewolves outside it.
fn speaker_compat_mask(
    bundle_true: &AssignmentSet,
    human: &AssignmentSet,
    wolf: &AssignmentSet,
) -> AssignmentSet {
    human
        .intersection(bundle_true)
        .union(&wolf.intersection(&bundle_true.complement()))
}

/// The solution sets still alive during generation or replay. Baseline mode
/// tracks a single assignment set; shill mode one set per candidate shill,
/// keeping the shill latent instead of expanding the assignment space.
enum SolutionSpace {
    Baseline(AssignmentSet),
    Shill(Vec<AssignmentSet>),
}

impl SolutionSpace {
    /// Premise: at least one werewolf; a shill must itself be human.
    fn seed(masks: &SpeakerMasks, shill_mode: bool) -> SolutionSpace {
        let n = masks.n;
        if shill_mode {
            let per_shill = (0..n as usize)
                .map(|s| {
                    let mut set = masks.human[s].clone();
                    set.remove(0);
                    set
                })
                .collect();
            SolutionSpace::Shill(per_shill)
        } else {
            let mut set = AssignmentSet::full(n);
            set.remove(0);
            SolutionSpace::Baseline(set)
        }
    }

    fn count(&self) -> usize {
        match self {
            SolutionSpace::Baseline(set) => set.count(),
            SolutionSpace::Shill(sets) => sets.iter().map(AssignmentSet::count).sum(),
        }
    }

    fn contains(&self, target: &Solution) -> bool {
        match (self, target.shill) {
            (SolutionSpace::Baseline(set), None) => set.contains(target.index),
            (SolutionSpace::Shill(sets), Some(s)) => sets[s as usize].contains(target.index),
            _ => false,
        }
    }

    fn sole(&self) -> Option<Solution> {
        match self {
            SolutionSpace::Baseline(set) => set.sole_member().map(|index| Solution {
                index,
                shill: None,
            }),
            SolutionSpace::Shill(sets) => {
                let mut found = None;
                for (s, set) in sets.iter().enumerate() {
                    match set.count() {
                        0 => {}
                        1 if found.is_none() => {
                            found = set.sole_member().map(|index| Solution {
                                index,
                                shill: Some(s as u8),
                            });
                        }
                        _ => return None,
                    }
                }
                found
            }
        }
    }

    /// Shrink by one speaker's bundle.
    fn constrained_by(
        &self,
        speaker: u8,
        bundle_true: &AssignmentSet,
        masks: &SpeakerMasks,
    ) -> SolutionSpace {
        let i = speaker as usize;
        match self {
            SolutionSpace::Baseline(set) => SolutionSpace::Baseline(set.intersection(
                &speaker_compat_mask(bundle_true, &masks.human[i], &masks.wolf[i]),
            )),
            SolutionSpace::Shill(sets) => {
                let lying = bundle_true.complement();
                let role_compat =
                    speaker_compat_mask(bundle_true, &masks.human[i], &masks.wolf[i]);
                let per_shill = sets
                    .iter()
                    .enumerate()
                    .map(|(s, set)| {
                        if s == i {
                            // The shill is human but their bundle is false.
                            set.intersection(&masks.human[i].intersection(&lying))
                        } else {
                            set.intersection(&role_compat)
                        }
                    })
                    .collect();
                SolutionSpace::Shill(per_shill)
            }
        }
    }
}

// ===== PUZZLES AND THE COMPACT CODE =====

/// A finished puzzle: one statement bundle per villager, immutable once
/// generated. `solution` is present on generator output and absent on
/// decoded codes until the verifier recovers it.
#[derive(Debug, Clone, PartialEq)]
struct Puzzle {
    n: u8,
    bundles: Vec<Vec<Statement>>,
    solution: Option<Solution>,
}

impl Puzzle {
    /// Compact wire form: speaker segments joined by `_`, bundle members by
    /// `+` (a single-statement bundle is just its code).
    fn encode(&self) -> String {
        self.bundles
            .iter()
            .map(|bundle| bundle_code(bundle))
            .collect::<Vec<_>>()
            .join("_")
    }

    fn decode(s: &str, n: u8) -> Result<Puzzle, Error> {
        let segments: Vec<&str> = s.split('_').collect();
        if segments.len() != n as usize {
            return Err(Error::MalformedPuzzle(format!(
                "expected {n} speaker segments, found {}",
                segments.len()
            )));
        }
        let mut bundles = Vec::with_capacity(segments.len());
        for segment in &segments {
            if segment.is_empty() {
                return Err(Error::MalformedPuzzle("empty speaker segment".to_string()));
            }
            let mut bundle = Vec::new();
            for code in segment.split('+') {
                bundle.push(Statement::parse(code, n)?);
            }
            bundles.push(bundle);
        }
        Ok(Puzzle {
            n,
            bundles,
            solution: None,
        })
    }

    fn statements(&self) -> impl Iterator<Item = &Statement> {
        self.bundles.iter().flatten()
    }

    /// Human rendering of the whole dialogue.
    fn describe(&self, names: &[String]) -> String {
        let mut out = format!(
            "A village of {} villagers; at least one is a werewolf.\n",
            self.n
        );
        for (i, bundle) in self.bundles.iter().enumerate() {
            out.push_str(&format!("{} says:\n", name_of(names, i as u8)));
            for statement in bundle {
                out.push_str(&format!("  - {}\n", statement.describe(names)));
            }
        }
        out
    }
}

fn bundle_code(bundle: &[Statement]) -> String {
    bundle
        .iter()
        .map(Statement::code)
        .collect::<Vec<_>>()
        .join("+")
}

fn bundle_cost(bundle: &[Statement]) -> u32 {
    bundle.iter().map(Statement::complexity_cost).sum()
}

const DEFAULT_NAMES: [&str; 6] = [
    "Alchemist Alice",
    "Baker Bob",
    "Captain Charlie",
    "Doctor Doris",
    "Elder Edith",
    "Farmer Frank",
];

fn default_names(n: u8) -> Vec<String> {
    (0..n)
        .map(|i| {
            DEFAULT_NAMES
                .get(i as usize)
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("Villager {i}"))
        })
        .collect()
}

// ===== GENERATOR =====

#[derive(Debug, Clone)]
struct GenerationConfig {
    n: u8,
    statements_min: usize,
    statements_max: usize,
    has_shill: bool,
    forbid_self_reference: bool,
    kinds: Vec<StatementKind>,
    punctured_scopes: bool,
    max_attempts: u32,
    candidate_pool_size: usize,
    min_werewolves: Option<u32>,
    max_werewolves: Option<u32>,
    /// Each speaker's bundle must introduce a statement code nobody used yet.
    diverse_statements: bool,
    /// Reject finished puzzles built from a single statement kind.
    reject_uniform_kinds: bool,
    /// Cap on count statements across the finished puzzle.
    max_count_statements: Option<usize>,
    /// Require at least one pair statement in the finished puzzle.
    require_pair_statement: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        GenerationConfig {
            n: 6,
            statements_min: 1,
            statements_max: 1,
            has_shill: false,
            forbid_self_reference: true,
            kinds: StatementKind::all().to_vec(),
            punctured_scopes: true,
            max_attempts: 100,
            candidate_pool_size: 50,
            min_werewolves: None,
            max_werewolves: None,
            diverse_statements: false,
            reject_uniform_kinds: false,
            max_count_statements: None,
            require_pair_statement: false,
        }
    }
}

impl GenerationConfig {
    fn library_config(&self) -> LibraryConfig {
        LibraryConfig {
            n: self.n,
            kinds: self.kinds.clone(),
            forbid_self_reference: self.forbid_self_reference,
            punctured_scopes: self.punctured_scopes,
        }
    }

    /// Target werewolf-count bounds: at least one werewolf always, and in
    /// shill mode at least one human to carry the shill.
    fn werewolf_bounds(&self) -> (u32, u32) {
        let n = self.n as u32;
        let min = self.min_werewolves.unwrap_or(1).max(1);
        let mut max = self.max_werewolves.unwrap_or(n).min(n);
        if self.has_shill {
            max = max.min(n.saturating_sub(1));
        }
        (min, max)
    }
}

/// Generate one puzzle with a unique solution. Deterministic in
/// (config, cache, seed); fails with `GenerationExhausted` once the attempt
/// budget runs out.
fn generate(config: &GenerationConfig, cache: &TruthCache, seed: u64) -> Result<Puzzle, Error> {
    let library = build_library(&config.library_config());
    cache.covers(&library)?;
    let mut generator = Generator {
        config,
        cache,
        masks: SpeakerMasks::build(config.n),
        library,
        rng: StdRng::seed_from_u64(seed),
    };
    for _ in 0..config.max_attempts {
        if let Some(puzzle) = generator.attempt()? {
            let options = VerifyOptions {
                has_shill: config.has_shill,
                ..VerifyOptions::default()
            };
            verify(&puzzle, cache, &options)?;
            return Ok(puzzle);
        }
    }
    Err(Error::GenerationExhausted {
        attempts: config.max_attempts,
    })
}

struct Generator<'a> {
    config: &'a GenerationConfig,
    cache: &'a TruthCache,
    masks: SpeakerMasks,
    library: Library,
    rng: StdRng,
}

impl Generator<'_> {
    /// One full generation attempt; `None` means dead end, try again.
    fn attempt(&mut self) -> Result<Option<Puzzle>, Error> {
        let n = self.config.n;
        let Some(target) = self.choose_target() else {
            return Ok(None);
        };
        let target_w = target.role_vector(n);

        // Candidate bundles per speaker, consistent with the target roles.
        let mut candidates: Vec<Vec<Vec<Statement>>> = Vec::with_capacity(n as usize);
        for speaker in 0..n {
            let lies = target_w.is_werewolf(speaker) || target.shill == Some(speaker);
            candidates.push(self.candidate_bundles(speaker, target_w, lies)?);
        }

        // Most-constrained speaker first.
        let mut order: Vec<usize> = (0..n as usize).collect();
        order.sort_by_key(|&i| (candidates[i].len(), i));

        let mut space = SolutionSpace::seed(&self.masks, self.config.has_shill);
        let mut assigned: Vec<Option<Vec<Statement>>> = vec![None; n as usize];
        let mut used_codes: BTreeSet<String> = BTreeSet::new();

        for &speaker in &order {
            let pool = self.sample_pool(&candidates[speaker]);

            let mut best_key: Option<(usize, u32, String)> = None;
            let mut best_pick: Option<(SolutionSpace, Vec<Statement>)> = None;
            for bundle in pool {
                if self.config.diverse_statements
                    && !bundle.iter().any(|st| !used_codes.contains(&st.code()))
                {
                    continue;
                }
                let bundle_true = self.cache.bundle_all_true_mask(bundle)?;
                let next = space.constrained_by(speaker as u8, &bundle_true, &self.masks);
                if !next.contains(&target) {
                    continue;
                }
                // Eliminate the most assignments; break ties toward cheap
                // statements, then stable code order.
                let key = (next.count(), bundle_cost(bundle), bundle_code(bundle));
                if best_key.as_ref().map_or(true, |k| key < *k) {
                    best_key = Some(key);
                    best_pick = Some((next, bundle.clone()));
                }
            }

            let Some((next, chosen)) = best_pick else {
                return Ok(None);
            };
            space = next;
            for statement in &chosen {
                used_codes.insert(statement.code());
            }
            assigned[speaker] = Some(chosen);
        }

        if space.sole() != Some(target) {
            return Ok(None);
        }

        let mut bundles = Vec::with_capacity(n as usize);
        for bundle in assigned {
            match bundle {
                Some(b) => bundles.push(b),
                None => return Ok(None),
            }
        }
        if !self.passes_post_filters(&bundles) {
            return Ok(None);
        }

        Ok(Some(Puzzle {
            n,
            bundles,
            solution: Some(target),
        }))
    }

    fn choose_target(&mut self) -> Option<Solution> {
        let n = self.config.n;
        let (min_w, max_w) = self.config.werewolf_bounds();
        let valid: Vec<usize> = (1..1usize << n)
            .filter(|&j| {
                let wolves = RoleVector::from_index(j, n).werewolf_count();
                (min_w..=max_w).contains(&wolves)
            })
            .collect();
        let &index = valid.choose(&mut self.rng)?;
        if self.config.has_shill {
            let humans: Vec<u8> = (0..n).filter(|&i| index >> i & 1 == 0).collect();
            let shill = humans.choose(&mut self.rng).copied()?;
            Some(Solution {
                index,
                shill: Some(shill),
            })
        } else {
            Some(Solution { index, shill: None })
        }
    }

    fn candidate_bundles(
        &mut self,
        speaker: u8,
        target: RoleVector,
        lies: bool,
    ) -> Result<Vec<Vec<Statement>>, Error> {
        let available: Vec<&Statement> = self
            .library
            .statements
            .iter()
            .filter(|st| !self.config.forbid_self_reference || st.mentions() >> speaker & 1 == 0)
            .collect();

        let mut bundles = Vec::new();
        for size in self.config.statements_min..=self.config.statements_max {
            if size == 0 || size > available.len() {
                continue;
            }
            let combos: Vec<Vec<usize>> = if size == 1 {
                (0..available.len()).map(|i| vec![i]).collect()
            } else if available.len() < 20 {
                let mut all = Vec::new();
                index_combinations(available.len(), size, &mut all);
                all
            } else {
                let indices: Vec<usize> = (0..available.len()).collect();
                (0..self.config.candidate_pool_size)
                    .map(|_| {
                        indices
                            .choose_multiple(&mut self.rng, size)
                            .copied()
                            .collect()
                    })
                    .collect()
            };

            for combo in combos {
                let bundle: Vec<Statement> =
                    combo.iter().map(|&i| available[i].clone()).collect();
                let all_true = bundle.iter().all(|st| st.evaluate(target));
                if lies {
                    // Liars need at least one false statement, but an
                    // outright self-contradiction would give them away.
                    if all_true || self.bundle_is_contradictory(&bundle)? {
                        continue;
                    }
                } else if !all_true {
                    continue;
                }
                let bundle = self.drop_contained_statements(bundle)?;
                if bundle.len() < self.config.statements_min {
                    continue;
                }
                bundles.push(bundle);
            }
        }

        // Prefer bundles whose first two statements do not retell the same
        // two villagers.
        if self.config.statements_min >= 2 {
            let varied: Vec<Vec<Statement>> = bundles
                .iter()
                .filter(|b| !retells_same_pair(b))
                .cloned()
                .collect();
            if !varied.is_empty() {
                return Ok(varied);
            }
        }
        Ok(bundles)
    }

    fn bundle_is_contradictory(&self, bundle: &[Statement]) -> Result<bool, Error> {
        for i in 0..bundle.len() {
            for j in i + 1..bundle.len() {
                if self
                    .cache
                    .mask(&bundle[i])?
                    .is_disjoint(self.cache.mask(&bundle[j])?)
                {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Drop members implied by a stronger member of the same bundle.
    fn drop_contained_statements(
        &self,
        bundle: Vec<Statement>,
    ) -> Result<Vec<Statement>, Error> {
        if bundle.len() <= 1 {
            return Ok(bundle);
        }
        let mut dropped = vec![false; bundle.len()];
        for i in 0..bundle.len() {
            if dropped[i] {
                continue;
            }
            for j in 0..bundle.len() {
                if i == j || dropped[j] {
                    continue;
                }
                let stronger = self.cache.mask(&bundle[i])?;
                let weaker = self.cache.mask(&bundle[j])?;
                if stronger.is_subset_of(weaker) {
                    dropped[j] = true;
                }
            }
        }
        Ok(bundle
            .into_iter()
            .zip(dropped)
            .filter(|(_, d)| !d)
            .map(|(s, _)| s)
            .collect())
    }

    fn sample_pool<'b>(&mut self, candidates: &'b [Vec<Statement>]) -> Vec<&'b Vec<Statement>> {
        if candidates.len() <= self.config.candidate_pool_size {
            candidates.iter().collect()
        } else {
            candidates
                .choose_multiple(&mut self.rng, self.config.candidate_pool_size)
                .collect()
        }
    }

    fn passes_post_filters(&self, bundles: &[Vec<Statement>]) -> bool {
        let all: Vec<&Statement> = bundles.iter().flatten().collect();
        if self.config.reject_uniform_kinds && self.config.kinds.len() > 1 {
            if let Some(first) = all.first() {
                if all.iter().all(|st| st.kind() == first.kind()) {
                    return false;
                }
            }
        }
        if let Some(limit) = self.config.max_count_statements {
            if all.iter().filter(|st| st.kind().is_count()).count() > limit {
                return false;
            }
        }
        if self.config.require_pair_statement && !all.iter().any(|st| !st.kind().is_count()) {
            return false;
        }
        true
    }
}

fn retells_same_pair(bundle: &[Statement]) -> bool {
    if bundle.len() < 2 {
        return false;
    }
    let first = bundle[0].mentions();
    first.count_ones() == 2 && bundle[1].mentions() == first
}

/// All k-subsets of 0..len, in lexicographic order.
fn index_combinations(len: usize, k: usize, result: &mut Vec<Vec<usize>>) {
    fn go(
        len: usize,
        k: usize,
        start: usize,
        current: &mut Vec<usize>,
        result: &mut Vec<Vec<usize>>,
    ) {
        if current.len() == k {
            result.push(current.clone());
            return;
        }
        for i in start..len {
            current.push(i);
            go(len, k, i + 1, current, result);
            current.pop();
        }
    }
    if k == 0 || k > len {
        return;
    }
    let mut current = Vec::with_capacity(k);
    go(len, k, 0, &mut current, result);
}

/// Fan a batch out over worker threads sharing one immutable cache. Each
/// worker derives its own seeds; setting the cancel flag makes workers
/// return whatever they already produced. Individually exhausted puzzles are
/// skipped, so the result may hold fewer than `count` entries.
fn generate_batch(
    config: &GenerationConfig,
    cache: &TruthCache,
    seed: u64,
    count: usize,
    workers: usize,
    cancel: &AtomicBool,
) -> Result<Vec<Puzzle>, Error> {
    let workers = workers.clamp(1, count.max(1));
    let results = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let quota = count / workers + usize::from(worker < count % workers);
                scope.spawn(move || {
                    let mut out: Vec<Result<Puzzle, Error>> = Vec::with_capacity(quota);
                    for task in 0..quota {
                        if cancel.load(Ordering::Relaxed) {
                            break;
                        }
                        let lane = (worker as u64) << 32 | task as u64;
                        let task_seed = seed ^ lane.wrapping_mul(0x9E37_79B9_7F4A_7C15);
                        match generate(config, cache, task_seed) {
                            Ok(puzzle) => out.push(Ok(puzzle)),
                            Err(Error::GenerationExhausted { .. }) => continue,
                            Err(e) => {
                                out.push(Err(e));
                                break;
                            }
                        }
                    }
                    out
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().expect("generation worker panicked"))
            .collect::<Vec<_>>()
    });

    let mut puzzles = Vec::with_capacity(results.len());
    for result in results {
        puzzles.push(result?);
    }
    Ok(puzzles)
}

// ===== VERIFIER =====

#[derive(Debug, Clone)]
struct VerifyOptions {
    has_shill: bool,
    timeout: Duration,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        VerifyOptions {
            has_shill: false,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Uniqueness check through two independent paths: replaying the cached
/// compatibility masks, and a SAT solve-and-block pass. Both must agree with
/// each other and with any stored solution.
fn verify(puzzle: &Puzzle, cache: &TruthCache, options: &VerifyOptions) -> Result<Solution, Error> {
    if puzzle.n != cache.n {
        return Err(Error::CacheIncompatible(format!(
            "cache is for N={}, puzzle has N={}",
            cache.n, puzzle.n
        )));
    }
    let replayed = replay_masks(puzzle, cache, options.has_shill)?;
    let solved = match sat_check(puzzle, options) {
        Ok(solution) => solution,
        // Replay already proved the model unique; a different count from the
        // sat pass is a disagreement between the two paths, not a result.
        Err(Error::NotUniquelySolvable { models }) => {
            return Err(Error::VerifierInconsistency(format!(
                "mask replay found a unique model but the sat check found {models}"
            )))
        }
        Err(e) => return Err(e),
    };
    if solved != replayed {
        return Err(Error::VerifierInconsistency(format!(
            "mask replay found {replayed:?} but the sat check found {solved:?}"
        )));
    }
    if let Some(stored) = puzzle.solution {
        if stored != replayed {
            return Err(Error::VerifierInconsistency(format!(
                "stored solution {stored:?} is not the unique model {replayed:?}"
            )));
        }
    }
    Ok(replayed)
}

/// Re-derive the surviving solution set from the truth cache alone.
fn replay_masks(puzzle: &Puzzle, cache: &TruthCache, has_shill: bool) -> Result<Solution, Error> {
    let masks = SpeakerMasks::build(puzzle.n);
    let mut space = SolutionSpace::seed(&masks, has_shill);
    for (speaker, bundle) in puzzle.bundles.iter().enumerate() {
        if bundle.is_empty() {
            return Err(Error::MalformedPuzzle(format!(
                "speaker {speaker} has no statements"
            )));
        }
        let bundle_true = cache.bundle_all_true_mask(bundle)?;
        space = space.constrained_by(speaker as u8, &bundle_true, &masks);
    }
    match space.sole() {
        Some(solution) => Ok(solution),
        None => {
            let models = space.count();
            if puzzle.solution.is_some() {
                Err(Error::VerifierInconsistency(format!(
                    "mask replay left {models} models for a puzzle with a stored solution"
                )))
            } else {
                Err(Error::NotUniquelySolvable { models })
            }
        }
    }
}

/// SAT pass: build a CNF equivalent of the role semantics, solve, block the
/// model, and demand UNSAT on the second solve.
fn sat_check(puzzle: &Puzzle, options: &VerifyOptions) -> Result<Solution, Error> {
    let n = puzzle.n;
    let mut instance: SatInstance<BasicVarManager> = SatInstance::new();
    let wolf_lits: Vec<Lit> = (0..n).map(|_| instance.new_lit()).collect();
    let shill_lits: Vec<Lit> = if options.has_shill {
        (0..n).map(|_| instance.new_lit()).collect()
    } else {
        Vec::new()
    };

    if options.has_shill {
        // Exactly one shill, through the same reified counter the count
        // statements use.
        let one_shill = reify_exact_count(&mut instance, &shill_lits, 1);
        instance.add_unit(one_shill);
        for i in 0..n as usize {
            // A shill is never a werewolf.
            instance.add_binary(!shill_lits[i], !wolf_lits[i]);
        }
    }

    // At least one werewolf.
    let premise: Clause = wolf_lits.iter().copied().collect();
    instance.add_clause(premise);

    for (speaker, bundle) in puzzle.bundles.iter().enumerate() {
        if bundle.is_empty() {
            return Err(Error::MalformedPuzzle(format!(
                "speaker {speaker} has no statements"
            )));
        }
        let members: Vec<Lit> = bundle
            .iter()
            .map(|st| reify_statement(&mut instance, &wolf_lits, st))
            .collect();
        let all_true = reify_conjunction(&mut instance, &members);
        // Honest speakers utter an all-true bundle; werewolves (and the
        // shill) never do.
        if options.has_shill {
            let liar = reify_or(&mut instance, wolf_lits[speaker], shill_lits[speaker]);
            instance.add_binary(!all_true, !liar);
            instance.add_binary(all_true, liar);
        } else {
            instance.add_binary(!all_true, !wolf_lits[speaker]);
            instance.add_binary(all_true, wolf_lits[speaker]);
        }
    }

    let cnf: Cnf = instance.into_cnf().0;
    let start = Instant::now();

    let mut solver = rustsat_minisat::core::Minisat::default();
    solver.add_cnf(cnf.clone()).map_err(|e| solver_failure(e))?;
    let first = solver.solve().map_err(|e| solver_failure(e))?;
    check_deadline(start, options)?;
    match first {
        SolverResult::Sat => {}
        SolverResult::Unsat => {
            return Err(if puzzle.solution.is_some() {
                Error::VerifierInconsistency(
                    "sat check found no model for a puzzle with a stored solution".to_string(),
                )
            } else {
                Error::NotUniquelySolvable { models: 0 }
            });
        }
        SolverResult::Interrupted => return Err(Error::VerifierTimeout(options.timeout)),
    }

    let mut index = 0usize;
    for (i, &lit) in wolf_lits.iter().enumerate() {
        if lit_is_true(&solver, lit)? {
            index |= 1 << i;
        }
    }
    let shill = if options.has_shill {
        let mut found = None;
        for (i, &lit) in shill_lits.iter().enumerate() {
            if lit_is_true(&solver, lit)? {
                if found.is_some() {
                    return Err(Error::VerifierInconsistency(
                        "model names two shills".to_string(),
                    ));
                }
                found = Some(i as u8);
            }
        }
        match found {
            Some(s) => Some(s),
            None => {
                return Err(Error::VerifierInconsistency(
                    "model names no shill".to_string(),
                ))
            }
        }
    } else {
        None
    };

    // Block the model and ask for a second one.
    let mut blocking: Vec<Lit> = wolf_lits
        .iter()
        .enumerate()
        .map(|(i, &lit)| if index >> i & 1 == 1 { !lit } else { lit })
        .collect();
    blocking.extend(
        shill_lits
            .iter()
            .enumerate()
            .map(|(i, &lit)| if shill == Some(i as u8) { !lit } else { lit }),
    );
    let mut blocked_cnf = cnf;
    blocked_cnf.add_clause(blocking.into_iter().collect());

    let mut second_solver = rustsat_minisat::core::Minisat::default();
    second_solver.add_cnf(blocked_cnf).map_err(|e| solver_failure(e))?;
    let second = second_solver.solve().map_err(|e| solver_failure(e))?;
    check_deadline(start, options)?;
    match second {
        SolverResult::Unsat => Ok(Solution { index, shill }),
        SolverResult::Sat => Err(if puzzle.solution.is_some() {
            Error::VerifierInconsistency("sat check found a second model".to_string())
        } else {
            Error::NotUniquelySolvable { models: 2 }
        }),
        SolverResult::Interrupted => Err(Error::VerifierTimeout(options.timeout)),
    }
}

fn solver_failure(e: impl std::fmt::Display) -> Error {
    Error::VerifierInconsistency(format!("sat solver failure: {e}"))
}

fn check_deadline(start: Instant, options: &VerifyOptions) -> Result<(), Error> {
    if start.elapsed() > options.timeout {
        Err(Error::VerifierTimeout(options.timeout))
    } else {
        Ok(())
    }
}

fn lit_is_true<S: Solve>(solver: &S, lit: Lit) -> Result<bool, Error> {
    match solver.lit_val(lit) {
        Ok(TernaryVal::True) => Ok(true),
        Ok(TernaryVal::False) => Ok(false),
        Ok(TernaryVal::DontCare) => Err(Error::VerifierInconsistency(
            "unassigned variable in a sat model".to_string(),
        )),
        Err(e) => Err(solver_failure(e)),
    }
}

// ===== SAT ENCODING HELPERS =====

/// Fresh literal pinned to a fixed truth value.
fn const_lit(instance: &mut SatInstance<BasicVarManager>, value: bool) -> Lit {
    let lit = instance.new_lit();
    if value {
        instance.add_unit(lit);
    } else {
        instance.add_unit(!lit);
    }
    lit
}

/// t <-> (a or b)
fn reify_or(instance: &mut SatInstance<BasicVarManager>, a: Lit, b: Lit) -> Lit {
    let t = instance.new_lit();
    instance.add_clause(vec![!t, a, b].into_iter().collect());
    instance.add_binary(t, !a);
    instance.add_binary(t, !b);
    t
}

/// t <-> (a and b)
fn reify_and(instance: &mut SatInstance<BasicVarManager>, a: Lit, b: Lit) -> Lit {
    let t = instance.new_lit();
    instance.add_binary(!t, a);
    instance.add_binary(!t, b);
    instance.add_clause(vec![t, !a, !b].into_iter().collect());
    t
}

/// t <-> (a xor b)
fn reify_xor(instance: &mut SatInstance<BasicVarManager>, a: Lit, b: Lit) -> Lit {
    let t = instance.new_lit();
    instance.add_clause(vec![!t, a, b].into_iter().collect());
    instance.add_clause(vec![!t, !a, !b].into_iter().collect());
    instance.add_clause(vec![t, !a, b].into_iter().collect());
    instance.add_clause(vec![t, a, !b].into_iter().collect());
    t
}

/// t <-> (every literal true)
fn reify_conjunction(instance: &mut SatInstance<BasicVarManager>, lits: &[Lit]) -> Lit {
    match lits.len() {
        0 => const_lit(instance, true),
        1 => lits[0],
        _ => {
            let t = instance.new_lit();
            for &lit in lits {
                instance.add_binary(!t, lit);
            }
            let mut clause: Vec<Lit> = vec![t];
            clause.extend(lits.iter().map(|&l| !l));
            instance.add_clause(clause.into_iter().collect());
            t
        }
    }
}

/// Literal equivalent to "at least k of xs are true". A sequential counter
/// with fully defined cells, so the output literal can be reused inside
/// other formulas.
fn reify_at_least(instance: &mut SatInstance<BasicVarManager>, xs: &[Lit], k: usize) -> Lit {
    if k == 0 {
        return const_lit(instance, true);
    }
    if k > xs.len() {
        return const_lit(instance, false);
    }
    // prev[kk-1]: at least kk of the inputs seen so far, kk in 1..=k.
    let mut prev: Vec<Lit> = Vec::new();
    for (i, &x) in xs.iter().enumerate() {
        let width = k.min(i + 1);
        let mut row: Vec<Lit> = Vec::with_capacity(width);
        for kk in 1..=width {
            let cell = if kk == 1 {
                if i == 0 {
                    x
                } else {
                    reify_or(instance, prev[0], x)
                }
            } else if kk == i + 1 {
                // Needs every input seen so far.
                reify_and(instance, prev[kk - 2], x)
            } else {
                let carry = reify_and(instance, prev[kk - 2], x);
                reify_or(instance, prev[kk - 1], carry)
            };
            row.push(cell);
        }
        prev = row;
    }
    prev[k - 1]
}

fn reify_exact_count(instance: &mut SatInstance<BasicVarManager>, xs: &[Lit], k: usize) -> Lit {
    let at_least_k = reify_at_least(instance, xs, k);
    let at_least_more = reify_at_least(instance, xs, k + 1);
    reify_and(instance, at_least_k, !at_least_more)
}

/// Literal equivalent to "an odd number of xs are true".
fn reify_parity_odd(instance: &mut SatInstance<BasicVarManager>, xs: &[Lit]) -> Lit {
    let mut acc: Option<Lit> = None;
    for &x in xs {
        acc = Some(match acc {
            None => x,
            Some(prev) => reify_xor(instance, prev, x),
        });
    }
    match acc {
        Some(lit) => lit,
        None => const_lit(instance, false),
    }
}

/// Literal equivalent to the statement's truth value under the wolf vars.
fn reify_statement(
    instance: &mut SatInstance<BasicVarManager>,
    wolves: &[Lit],
    statement: &Statement,
) -> Lit {
    let w = |i: &u8| wolves[*i as usize];
    let scope_lits = |scope: &[u8]| -> Vec<Lit> {
        scope.iter().map(|&i| wolves[i as usize]).collect()
    };
    match statement {
        Statement::Implies { a, b } => reify_or(instance, !w(a), w(b)),
        Statement::BothOrNeither { a, b } => !reify_xor(instance, w(a), w(b)),
        Statement::AtLeastOne { a, b } => reify_or(instance, w(a), w(b)),
        Statement::ExactlyOne { a, b } => reify_xor(instance, w(a), w(b)),
        Statement::AtMostOne { a, b } => !reify_and(instance, w(a), w(b)),
        Statement::IfNotThen { a, b } => reify_or(instance, w(a), w(b)),
        Statement::Neither { a, b } => !reify_or(instance, w(a), w(b)),
        Statement::ExactCount { scope, count } => {
            let xs = scope_lits(scope);
            reify_exact_count(instance, &xs, *count as usize)
        }
        Statement::AtMostCount { scope, count } => {
            let xs = scope_lits(scope);
            !reify_at_least(instance, &xs, *count as usize + 1)
        }
        Statement::AtLeastCount { scope, count } => {
            let xs = scope_lits(scope);
            reify_at_least(instance, &xs, *count as usize)
        }
        Statement::EvenCount { scope } => {
            let xs = scope_lits(scope);
            !reify_parity_odd(instance, &xs)
        }
        Statement::OddCount { scope } => {
            let xs = scope_lits(scope);
            reify_parity_odd(instance, &xs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library_for(n: u8, kinds: &[StatementKind]) -> Library {
        build_library(&LibraryConfig {
            n,
            kinds: kinds.to_vec(),
            forbid_self_reference: true,
            punctured_scopes: true,
        })
    }

    fn cache_for(n: u8) -> TruthCache {
        TruthCache::build(&build_library(&LibraryConfig::standard(n)))
    }

    fn temp_cache_path(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!(
            "werewolf-core-test-{tag}-{}.cache",
            std::process::id()
        ))
    }

    fn role_vector(n: u8, wolves: &[u8]) -> RoleVector {
        let bits = wolves.iter().fold(0usize, |acc, &i| acc | 1 << i);
        RoleVector::from_index(bits, n)
    }

    #[test]
    fn test_role_vector_round_trip() {
        for index in 0..1usize << 5 {
            let w = RoleVector::from_index(index, 5);
            assert_eq!(w.index(), index);
            let rebuilt = (0..5).fold(0usize, |acc, i| {
                if w.is_werewolf(i) {
                    acc | 1 << i
                } else {
                    acc
                }
            });
            assert_eq!(rebuilt, index);
        }
    }

    #[test]
    fn test_assignment_set_basics() {
        let mut set = AssignmentSet::empty(6);
        assert_eq!(set.count(), 0);
        set.insert(0);
        set.insert(17);
        set.insert(63);
        assert_eq!(set.count(), 3);
        assert!(set.contains(17));
        assert!(!set.contains(16));
        set.remove(17);
        assert_eq!(set.count(), 2);
        assert_eq!(set.sole_member(), None);
        set.remove(0);
        assert_eq!(set.sole_member(), Some(63));

        let full = AssignmentSet::full(6);
        assert_eq!(full.count(), 64);
        assert_eq!(full.complement().count(), 0);
        assert!(set.is_subset_of(&full));
        assert!(set.is_disjoint(&set.complement()));
        assert_eq!(set.union(&set.complement()), full);
    }

    #[test]
    fn test_assignment_set_hex_round_trip() {
        let mut set = AssignmentSet::empty(6);
        set.insert(0);
        set.insert(5);
        set.insert(40);
        let hex = set.to_hex();
        assert_eq!(hex.len(), 16, "2^6 bits must print as 16 hex digits");
        let back = AssignmentSet::from_hex(&hex, 6).unwrap();
        assert_eq!(back, set);

        assert!(matches!(
            AssignmentSet::from_hex("FF", 6),
            Err(Error::CacheIncompatible(_))
        ));
        assert!(matches!(
            AssignmentSet::from_hex("zzzzzzzzzzzzzzzz", 6),
            Err(Error::CacheIncompatible(_))
        ));
    }

    #[test]
    fn test_statement_evaluation_pairs() {
        let n = 6;
        let x = Statement::parse("X-2-4", n).unwrap();
        assert!(x.evaluate(role_vector(n, &[2])));
        assert!(!x.evaluate(role_vector(n, &[2, 4])));
        assert!(!x.evaluate(role_vector(n, &[])));

        let imp = Statement::parse("I-3-1", n).unwrap();
        assert!(imp.evaluate(role_vector(n, &[])));
        assert!(imp.evaluate(role_vector(n, &[3, 1])));
        assert!(!imp.evaluate(role_vector(n, &[3])));

        let neither = Statement::parse("N-0-2", n).unwrap();
        assert!(neither.evaluate(role_vector(n, &[1, 3])));
        assert!(!neither.evaluate(role_vector(n, &[0])));

        let at_most = Statement::parse("T-1-2", n).unwrap();
        assert!(at_most.evaluate(role_vector(n, &[1])));
        assert!(!at_most.evaluate(role_vector(n, &[1, 2])));

        let conv = Statement::parse("F-5-0", n).unwrap();
        assert!(conv.evaluate(role_vector(n, &[5])));
        assert!(conv.evaluate(role_vector(n, &[0])));
        assert!(!conv.evaluate(role_vector(n, &[1])));
    }

    #[test]
    fn test_statement_evaluation_counts() {
        let n = 6;
        let exact = Statement::parse("E-0.1.2.3.4.5-3", n).unwrap();
        assert!(exact.evaluate(role_vector(n, &[0, 1, 2])));
        assert!(!exact.evaluate(role_vector(n, &[0, 1])));

        let scoped = Statement::parse("E-0.1.2.3.5-4", n).unwrap();
        assert!(scoped.evaluate(role_vector(n, &[0, 1, 2, 5])));
        assert!(scoped.evaluate(role_vector(n, &[0, 1, 2, 4, 5])), "index 4 is outside the scope");
        assert!(!scoped.evaluate(role_vector(n, &[0, 1, 2, 3, 5])));

        let upper = Statement::parse("M-0.1.2-1", n).unwrap();
        assert!(upper.evaluate(role_vector(n, &[2, 4, 5])));
        assert!(!upper.evaluate(role_vector(n, &[0, 2])));

        let lower = Statement::parse("L-1.3.5-2", n).unwrap();
        assert!(lower.evaluate(role_vector(n, &[1, 3])));
        assert!(!lower.evaluate(role_vector(n, &[1])));

        let even = Statement::parse("V-0.1.2.3", n).unwrap();
        assert!(even.evaluate(role_vector(n, &[])));
        assert!(even.evaluate(role_vector(n, &[0, 3])));
        assert!(!even.evaluate(role_vector(n, &[0])));

        let odd = Statement::parse("O-2.4", n).unwrap();
        assert!(odd.evaluate(role_vector(n, &[2])));
        assert!(!odd.evaluate(role_vector(n, &[2, 4])));
    }

    #[test]
    fn test_statement_code_round_trip_whole_library() {
        for n in [4u8, 5, 6] {
            let library = build_library(&LibraryConfig::standard(n));
            for statement in &library.statements {
                let code = statement.code();
                let parsed = Statement::parse(&code, n)
                    .unwrap_or_else(|e| panic!("library code `{code}` failed to parse: {e}"));
                assert_eq!(&parsed, statement, "round trip changed `{code}`");
                assert!(statement.complexity_cost() > 0);
            }
        }
    }

    #[test]
    fn test_statement_parse_rejects_malformed() {
        let n = 6;
        for code in ["", "Q-1-2", "I-1", "I-1-2-3", "I-x-2", "E-0.1", "E--2", "V-0-1", "E-0.1.2-x"] {
            assert!(
                matches!(Statement::parse(code, n), Err(Error::MalformedCode { .. })),
                "`{code}` should be malformed"
            );
        }
    }

    #[test]
    fn test_statement_parse_rejects_out_of_range() {
        assert!(matches!(
            Statement::parse("I-9-1", 6),
            Err(Error::OutOfRangeIndex { index: 9, n: 6 })
        ));
        assert!(matches!(
            Statement::parse("E-0.1.6-1", 6),
            Err(Error::OutOfRangeIndex { index: 6, n: 6 })
        ));
    }

    #[test]
    fn test_statement_parse_rejects_non_canonical_pair() {
        for code in ["B-3-1", "X-2-2", "A-5-0", "T-4-4", "N-2-1"] {
            assert!(
                matches!(Statement::parse(code, 6), Err(Error::NonCanonicalPair(_))),
                "`{code}` should be rejected as non-canonical"
            );
        }
        // Directional pairs carry no ordering constraint.
        assert!(Statement::parse("I-3-1", 6).is_ok());
        assert!(Statement::parse("F-5-0", 6).is_ok());
    }

    #[test]
    fn test_statement_parse_rejects_bad_scope() {
        for code in ["E-0.0.2-1", "E-2.1-1", "V-3.3", "O-5.2"] {
            assert!(
                matches!(Statement::parse(code, 6), Err(Error::MalformedCode { .. })),
                "`{code}` should be rejected for its scope"
            );
        }
    }

    #[test]
    fn test_complexity_costs() {
        let n = 6;
        assert_eq!(Statement::parse("I-0-1", n).unwrap().complexity_cost(), 1);
        assert_eq!(Statement::parse("B-0-1", n).unwrap().complexity_cost(), 1);
        assert_eq!(Statement::parse("A-0-1", n).unwrap().complexity_cost(), 1);
        assert_eq!(Statement::parse("F-0-1", n).unwrap().complexity_cost(), 1);
        assert_eq!(Statement::parse("X-0-1", n).unwrap().complexity_cost(), 2);
        assert_eq!(Statement::parse("T-0-1", n).unwrap().complexity_cost(), 2);
        assert_eq!(Statement::parse("N-0-1", n).unwrap().complexity_cost(), 3);
        assert_eq!(Statement::parse("E-0.1.2-2", n).unwrap().complexity_cost(), 8);
        assert_eq!(Statement::parse("V-0.1.2.3", n).unwrap().complexity_cost(), 8);
    }

    #[test]
    fn test_library_is_deterministic() {
        let a = build_library(&LibraryConfig::standard(6));
        let b = build_library(&LibraryConfig::standard(6));
        assert_eq!(a.statements, b.statements);
        assert!(!a.statements.is_empty());

        // Self-pairs only exist when self-reference is allowed.
        assert!(!a.statements.iter().any(|s| s.code() == "I-2-2"));
        let loose = build_library(&LibraryConfig {
            forbid_self_reference: false,
            ..LibraryConfig::standard(6)
        });
        assert!(loose.statements.iter().any(|s| s.code() == "I-2-2"));
    }

    #[test]
    fn test_library_punctured_scopes_toggle() {
        let with = build_library(&LibraryConfig::standard(6));
        let without = build_library(&LibraryConfig {
            punctured_scopes: false,
            ..LibraryConfig::standard(6)
        });
        assert!(with.statements.len() > without.statements.len());
        assert!(with.statements.iter().any(|s| s.code() == "E-0.1.2.3.4-1"));
        assert!(!without.statements.iter().any(|s| s.code() == "E-0.1.2.3.4-1"));
    }

    #[test]
    fn test_truth_masks_match_evaluation() {
        let n = 4;
        let library = build_library(&LibraryConfig::standard(n));
        let cache = TruthCache::build(&library);
        for statement in &library.statements {
            let mask = cache.mask(statement).unwrap();
            for index in 0..1usize << n {
                assert_eq!(
                    mask.contains(index),
                    statement.evaluate(RoleVector::from_index(index, n)),
                    "mask bit {index} disagrees with evaluation of `{}`",
                    statement.code()
                );
            }
        }
    }

    #[test]
    fn test_human_wolf_masks() {
        let n = 5;
        let masks = SpeakerMasks::build(n);
        let full = AssignmentSet::full(n);
        for i in 0..n as usize {
            assert!(masks.human[i].is_disjoint(&masks.wolf[i]));
            assert_eq!(masks.human[i].union(&masks.wolf[i]), full);
            for index in 0..1usize << n {
                let is_wolf = index >> i & 1 == 1;
                assert_eq!(masks.wolf[i].contains(index), is_wolf);
                assert_eq!(masks.human[i].contains(index), !is_wolf);
            }
        }
    }

    #[test]
    fn test_cache_file_round_trip() {
        let cache = cache_for(5);
        let path = temp_cache_path("round-trip");
        cache.save(&path).unwrap();
        let loaded = TruthCache::load(&path, 5).unwrap();
        assert_eq!(loaded.len(), cache.len());
        let library = build_library(&LibraryConfig::standard(5));
        loaded.covers(&library).unwrap();
        for statement in &library.statements {
            assert_eq!(
                loaded.mask(statement).unwrap(),
                cache.mask(statement).unwrap()
            );
        }
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_cache_load_rejects_wrong_n() {
        let cache = cache_for(6);
        let path = temp_cache_path("wrong-n");
        cache.save(&path).unwrap();
        let result = TruthCache::load(&path, 5);
        assert!(
            matches!(result, Err(Error::CacheIncompatible(_))),
            "a cache built for N=6 must not load for N=5"
        );
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_cache_load_rejects_garbage() {
        let path = temp_cache_path("garbage");
        std::fs::write(&path, "hello\nworld\n").unwrap();
        assert!(matches!(
            TruthCache::load(&path, 6),
            Err(Error::CacheIncompatible(_))
        ));

        // Valid header, bogus statement code.
        std::fs::write(&path, "N=6\ncount=1\nQ-1-2 0000000000000000\n").unwrap();
        assert!(matches!(
            TruthCache::load(&path, 6),
            Err(Error::CacheIncompatible(_))
        ));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_cache_covers_rejects_missing_statements() {
        let narrow = TruthCache::build(&library_for(6, &[StatementKind::Implication]));
        let wide = library_for(6, &[StatementKind::Implication, StatementKind::Equivalence]);
        assert!(matches!(
            narrow.covers(&wide),
            Err(Error::CacheIncompatible(_))
        ));
    }

    #[test]
    fn test_puzzle_code_round_trip() {
        let n = 6;
        let code = "I-3-1_N-0-2_X-1-3_F-5-0_E-0.1.2.3.5-4_B-0-3";
        let puzzle = Puzzle::decode(code, n).unwrap();
        assert_eq!(puzzle.bundles.len(), 6);
        assert_eq!(puzzle.encode(), code);

        // Bundles keep their members through the wire form.
        let bundled = "I-3-1+B-1-2_N-0-2_X-1-3_F-5-0_E-0.1.2.3.5-4_B-0-3";
        let puzzle = Puzzle::decode(bundled, n).unwrap();
        assert_eq!(puzzle.bundles[0].len(), 2);
        assert_eq!(puzzle.encode(), bundled);
    }

    #[test]
    fn test_puzzle_decode_rejects_wrong_segment_count() {
        let result = Puzzle::decode("I-3-1_N-0-2", 6);
        assert!(
            matches!(result, Err(Error::MalformedPuzzle(_))),
            "two segments must not decode as a six-villager puzzle"
        );
    }

    #[test]
    fn test_puzzle_decode_rejects_empty_segment() {
        assert!(matches!(
            Puzzle::decode("I-3-1__X-1-3_F-5-0_E-0.1.2.3.5-4_B-0-3", 6),
            Err(Error::MalformedPuzzle(_))
        ));
        // Statement-level failures keep their own tags.
        assert!(matches!(
            Puzzle::decode("I-9-1_N-0-2_X-1-3_F-5-0_E-0.1.2.3.5-4_B-0-3", 6),
            Err(Error::OutOfRangeIndex { .. })
        ));
    }

    #[test]
    fn test_speaker_compat_mask() {
        let n = 3;
        let masks = SpeakerMasks::build(n);
        let cache = cache_for(n);
        let statement = Statement::parse("B-1-2", n).unwrap();
        let truth = cache.mask(&statement).unwrap();
        let compat = speaker_compat_mask(truth, &masks.human[0], &masks.wolf[0]);
        for index in 0..1usize << n {
            let w = RoleVector::from_index(index, n);
            let expected = statement.evaluate(w) == !w.is_werewolf(0);
            assert_eq!(compat.contains(index), expected, "assignment {index}");
        }
    }

    #[test]
    fn test_verify_unique_handcrafted_puzzle() {
        let n = 4;
        let cache = cache_for(n);
        let puzzle = Puzzle::decode("I-1-2_I-0-2_B-0-1_I-2-0", n).unwrap();
        let solution = verify(&puzzle, &cache, &VerifyOptions::default()).unwrap();
        assert_eq!(solution, Solution { index: 3, shill: None });
        let w = solution.role_vector(n);
        assert!(w.is_werewolf(0) && w.is_werewolf(1));
        assert!(!w.is_werewolf(2) && !w.is_werewolf(3));
    }

    #[test]
    fn test_verify_rejects_ambiguous_puzzle() {
        let n = 4;
        let cache = cache_for(n);
        let puzzle = Puzzle::decode("B-1-2_B-0-2_B-0-1_I-2-0", n).unwrap();
        let result = verify(&puzzle, &cache, &VerifyOptions::default());
        assert!(
            matches!(result, Err(Error::NotUniquelySolvable { models: 3 })),
            "expected three surviving models, got {result:?}"
        );
    }

    #[test]
    fn test_verify_detects_wrong_stored_solution() {
        let n = 4;
        let cache = cache_for(n);
        let mut puzzle = Puzzle::decode("I-1-2_I-0-2_B-0-1_I-2-0", n).unwrap();
        puzzle.solution = Some(Solution { index: 5, shill: None });
        assert!(matches!(
            verify(&puzzle, &cache, &VerifyOptions::default()),
            Err(Error::VerifierInconsistency(_))
        ));
    }

    #[test]
    fn test_generate_baseline_n4() {
        let config = GenerationConfig {
            n: 4,
            kinds: vec![StatementKind::Implication, StatementKind::Equivalence],
            max_attempts: 400,
            ..GenerationConfig::default()
        };
        let cache = TruthCache::build(&build_library(&config.library_config()));
        let puzzle = generate(&config, &cache, 42).expect("seed 42 should yield a puzzle");
        assert_eq!(puzzle.bundles.len(), 4);
        assert!(puzzle.bundles.iter().all(|b| b.len() == 1));
        let stored = puzzle.solution.expect("generator stores the solution");

        // The code survives the wire and re-verifies to the same solution.
        let decoded = Puzzle::decode(&puzzle.encode(), 4).unwrap();
        let solution = verify(&decoded, &cache, &VerifyOptions::default()).unwrap();
        assert_eq!(solution, stored);
    }

    #[test]
    fn test_generate_is_deterministic() {
        let config = GenerationConfig {
            n: 5,
            max_attempts: 200,
            ..GenerationConfig::default()
        };
        let cache = TruthCache::build(&build_library(&config.library_config()));
        let a = generate(&config, &cache, 7).unwrap();
        let b = generate(&config, &cache, 7).unwrap();
        assert_eq!(a, b, "same seed must reproduce the same puzzle");
    }

    #[test]
    fn test_generated_statements_respect_self_reference() {
        let config = GenerationConfig {
            n: 5,
            max_attempts: 200,
            ..GenerationConfig::default()
        };
        let cache = TruthCache::build(&build_library(&config.library_config()));
        let puzzle = generate(&config, &cache, 11).unwrap();
        for (speaker, bundle) in puzzle.bundles.iter().enumerate() {
            for statement in bundle {
                assert_eq!(
                    statement.mentions() >> speaker & 1,
                    0,
                    "speaker {speaker} talks about itself in `{}`",
                    statement.code()
                );
            }
        }
    }

    #[test]
    fn test_generate_shill_mode() {
        let config = GenerationConfig {
            n: 6,
            has_shill: true,
            max_attempts: 500,
            ..GenerationConfig::default()
        };
        let cache = TruthCache::build(&build_library(&config.library_config()));
        let puzzle = generate(&config, &cache, 3).expect("shill generation should succeed");
        let solution = puzzle.solution.unwrap();
        let shill = solution.shill.expect("shill mode stores the shill");
        let w = solution.role_vector(6);

        assert!(!w.is_werewolf(shill), "the shill must be human");
        for (speaker, bundle) in puzzle.bundles.iter().enumerate() {
            let speaker = speaker as u8;
            let all_true = bundle.iter().all(|st| st.evaluate(w));
            if speaker == shill || w.is_werewolf(speaker) {
                assert!(!all_true, "liar {speaker} has an all-true bundle");
            } else {
                assert!(all_true, "honest villager {speaker} has a false statement");
            }
        }

        // The latent shill is recovered from the bare code.
        let decoded = Puzzle::decode(&puzzle.encode(), 6).unwrap();
        let options = VerifyOptions {
            has_shill: true,
            ..VerifyOptions::default()
        };
        assert_eq!(verify(&decoded, &cache, &options).unwrap(), solution);
    }

    #[test]
    fn test_default_config_success_rate() {
        let config = GenerationConfig::default();
        let cache = TruthCache::build(&build_library(&config.library_config()));
        for seed in 0..10 {
            let puzzle = generate(&config, &cache, seed)
                .unwrap_or_else(|e| panic!("seed {seed} failed: {e}"));
            assert_eq!(puzzle.bundles.len(), 6);
        }
    }

    #[test]
    fn test_generate_respects_werewolf_bounds() {
        let config = GenerationConfig {
            n: 6,
            min_werewolves: Some(2),
            max_werewolves: Some(4),
            max_attempts: 200,
            ..GenerationConfig::default()
        };
        let cache = TruthCache::build(&build_library(&config.library_config()));
        for seed in [1, 2, 3] {
            let puzzle = generate(&config, &cache, seed).unwrap();
            let wolves = puzzle.solution.unwrap().role_vector(6).werewolf_count();
            assert!((2..=4).contains(&wolves), "seed {seed} produced {wolves} wolves");
        }
    }

    #[test]
    fn test_generate_batch() {
        let config = GenerationConfig {
            n: 4,
            max_attempts: 200,
            ..GenerationConfig::default()
        };
        let cache = TruthCache::build(&build_library(&config.library_config()));
        let cancel = AtomicBool::new(false);
        let first = generate_batch(&config, &cache, 99, 4, 2, &cancel).unwrap();
        assert_eq!(first.len(), 4);
        for puzzle in &first {
            verify(puzzle, &cache, &VerifyOptions::default()).unwrap();
        }
        let second = generate_batch(&config, &cache, 99, 4, 2, &cancel).unwrap();
        let codes = |batch: &[Puzzle]| batch.iter().map(Puzzle::encode).collect::<Vec<_>>();
        assert_eq!(codes(&first), codes(&second), "batches must be reproducible");
    }

    #[test]
    fn test_generate_batch_cancellation() {
        let config = GenerationConfig {
            n: 4,
            ..GenerationConfig::default()
        };
        let cache = TruthCache::build(&build_library(&config.library_config()));
        let cancel = AtomicBool::new(true);
        let puzzles = generate_batch(&config, &cache, 5, 8, 2, &cancel).unwrap();
        assert!(puzzles.is_empty(), "a pre-set cancel flag stops all workers");
    }

    // Count the models of `statement` over its mentioned variables by
    // solve-and-block, then scale up by the unmentioned variables and
    // compare against brute-force evaluation.
    fn assert_sat_encoding_matches(code: &str, n: u8) {
        let statement = Statement::parse(code, n).unwrap();
        let mut instance: SatInstance<BasicVarManager> = SatInstance::new();
        let wolves: Vec<Lit> = (0..n).map(|_| instance.new_lit()).collect();
        let t = reify_statement(&mut instance, &wolves, &statement);
        instance.add_unit(t);

        let mentioned: Vec<usize> = (0..n as usize)
            .filter(|&i| statement.mentions() >> i & 1 == 1)
            .collect();
        let mut cnf = instance.into_cnf().0;
        let mut models = 0usize;
        loop {
            let mut solver = rustsat_minisat::core::Minisat::default();
            solver.add_cnf(cnf.clone()).unwrap();
            match solver.solve().unwrap() {
                SolverResult::Sat => {
                    let mut free = 0u32;
                    let mut blocking: Vec<Lit> = Vec::new();
                    for &i in &mentioned {
                        match solver.lit_val(wolves[i]) {
                            Ok(TernaryVal::True) => blocking.push(!wolves[i]),
                            Ok(TernaryVal::False) => blocking.push(wolves[i]),
                            _ => free += 1,
                        }
                    }
                    models += 1usize << free;
                    if blocking.is_empty() {
                        break;
                    }
                    cnf.add_clause(blocking.into_iter().collect());
                }
                SolverResult::Unsat => break,
                SolverResult::Interrupted => panic!("solver interrupted"),
            }
        }

        let brute: usize = (0..1usize << n)
            .filter(|&index| statement.evaluate(RoleVector::from_index(index, n)))
            .count();
        let scale = 1usize << (n as usize - mentioned.len());
        assert_eq!(
            models * scale,
            brute,
            "sat encoding of `{code}` disagrees with brute force"
        );
    }

    #[test]
    fn test_sat_encoding_matches_semantics() {
        let n = 4;
        for code in [
            "I-2-0", "F-0-1", "B-0-2", "A-1-3", "X-0-3", "T-1-2", "N-0-1",
            "E-0.1.2.3-2", "E-0.1.2-3", "M-0.1.2-1", "M-0.1.2.3-4", "L-1.2.3-2",
            "L-0.1.2.3-0", "V-0.1.2.3", "O-0.2", "O-1.2.3",
        ] {
            assert_sat_encoding_matches(code, n);
        }
    }

    #[test]
    fn test_parse_kind_names_with_suggestions() {
        let kinds = parse_kind_list("implication, equivalence,exact-count").unwrap();
        assert_eq!(
            kinds,
            vec![
                StatementKind::Implication,
                StatementKind::Equivalence,
                StatementKind::ExactCount
            ]
        );

        let err = parse_kind_list("implicaton").unwrap_err();
        assert!(
            err.contains("implication"),
            "expected a did-you-mean hint, got: {err}"
        );
        assert!(parse_kind_list("").is_err());
    }

    #[test]
    fn test_describe_statements() {
        let names = default_names(6);
        assert_eq!(
            Statement::parse("I-3-1", 6).unwrap().describe(&names),
            "If Doctor Doris is a werewolf, then Baker Bob is a werewolf."
        );
        assert_eq!(
            Statement::parse("N-0-2", 6).unwrap().describe(&names),
            "Neither Alchemist Alice nor Captain Charlie is a werewolf."
        );
        assert_eq!(
            Statement::parse("E-0.1.2.3.5-4", 6).unwrap().describe(&names),
            "Exactly 4 werewolves among 5 villagers."
        );
        assert_eq!(
            Statement::parse("O-2.4", 6).unwrap().describe(&names),
            "An odd number of werewolves among Captain Charlie and Elder Edith."
        );
    }

    #[test]
    fn test_diversity_post_filters() {
        let config = GenerationConfig {
            n: 6,
            reject_uniform_kinds: true,
            require_pair_statement: true,
            max_count_statements: Some(4),
            max_attempts: 500,
            ..GenerationConfig::default()
        };
        let cache = TruthCache::build(&build_library(&config.library_config()));
        let puzzle = generate(&config, &cache, 13).unwrap();
        let statements: Vec<&Statement> = puzzle.statements().collect();
        let first = statements[0].kind();
        assert!(statements.iter().any(|st| st.kind() != first));
        assert!(statements.iter().any(|st| !st.kind().is_count()));
        assert!(statements.iter().filter(|st| st.kind().is_count()).count() <= 4);
    }
}

// ===== COMMAND-LINE INTERFACE =====

/// Werewolf puzzle engine
#[derive(Parser, Debug)]
#[command(name = "werewolf-core")]
#[command(about = "Werewolf logic-puzzle generator with SAT-verified unique solutions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate one or more puzzles with a unique solution
    Generate(GenerateArgs),

    /// Check that a puzzle code admits exactly one solution
    Verify(VerifyArgs),

    /// Build a truth cache and write it to a file
    BuildCache(BuildCacheArgs),
}

#[derive(clap::Args, Debug)]
struct GenerateArgs {
    /// Number of villagers
    #[arg(long, default_value_t = 6)]
    n: u8,

    /// Minimum statements per speaker
    #[arg(long, default_value_t = 1)]
    statements_min: usize,

    /// Maximum statements per speaker
    #[arg(long, default_value_t = 1)]
    statements_max: usize,

    /// Exactly one non-werewolf lies as a paid shill
    #[arg(long)]
    has_shill: bool,

    /// Give up after this many generation attempts
    #[arg(long, default_value_t = 100)]
    max_attempts: u32,

    /// Comma-separated statement kinds (default: all twelve)
    #[arg(long)]
    kinds: Option<String>,

    /// Let villagers make statements about themselves
    #[arg(long)]
    allow_self_reference: bool,

    /// Skip the count scopes that leave out one villager
    #[arg(long)]
    no_punctured_scopes: bool,

    /// Every speaker must introduce a statement nobody used yet
    #[arg(long)]
    diverse_statements: bool,

    /// Reject puzzles built from a single statement kind
    #[arg(long)]
    reject_uniform_kinds: bool,

    /// Cap on count statements across the puzzle
    #[arg(long)]
    max_count_statements: Option<usize>,

    /// Require at least one pair statement in the puzzle
    #[arg(long)]
    require_pair_statement: bool,

    /// Minimum werewolves in the solution
    #[arg(long)]
    min_werewolves: Option<u32>,

    /// Maximum werewolves in the solution
    #[arg(long)]
    max_werewolves: Option<u32>,

    /// RNG seed; identical inputs reproduce identical puzzles
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Number of puzzles to generate
    #[arg(long, default_value_t = 1)]
    count: usize,

    /// Worker threads for batch generation
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Truth-cache file, built and saved on demand
    #[arg(long)]
    cache_file: Option<std::path::PathBuf>,

    /// Rebuild the truth cache even if the file exists
    #[arg(long)]
    rebuild_cache: bool,

    /// Output form per puzzle
    #[arg(long, default_value = "code", value_parser = ["code", "text"])]
    output: String,

    /// Print the solution alongside each puzzle
    #[arg(long)]
    show_solution: bool,
}

#[derive(clap::Args, Debug)]
struct VerifyArgs {
    /// Compact puzzle code (underscore-separated speaker segments)
    code: String,

    /// Number of villagers
    #[arg(long, default_value_t = 6)]
    n: u8,

    /// Verify under shill semantics
    #[arg(long)]
    has_shill: bool,
}

#[derive(clap::Args, Debug)]
struct BuildCacheArgs {
    /// Number of villagers
    #[arg(long, default_value_t = 6)]
    n: u8,

    /// Comma-separated statement kinds (default: all twelve)
    #[arg(long)]
    kinds: Option<String>,

    /// Let villagers make statements about themselves
    #[arg(long)]
    allow_self_reference: bool,

    /// Skip the count scopes that leave out one villager
    #[arg(long)]
    no_punctured_scopes: bool,

    /// Target file
    #[arg(long)]
    cache_file: std::path::PathBuf,
}

fn main() {
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Generate(args) => generate_cmd(args),
        Command::Verify(args) => verify_cmd(args),
        Command::BuildCache(args) => build_cache_cmd(args),
    };
    if let Err(e) = result {
        eprintln!("Error: {e}");
        let code = match e {
            Error::GenerationExhausted { .. } | Error::NotUniquelySolvable { .. } => 1,
            _ => 2,
        };
        std::process::exit(code);
    }
}

fn parse_kind_list(input: &str) -> Result<Vec<StatementKind>, String> {
    let mut kinds = Vec::new();
    for token in input.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match StatementKind::from_name(token) {
            Some(kind) => {
                if !kinds.contains(&kind) {
                    kinds.push(kind);
                }
            }
            None => return Err(unknown_kind_message(token)),
        }
    }
    if kinds.is_empty() {
        return Err("no statement kinds given".to_string());
    }
    Ok(kinds)
}

fn unknown_kind_message(token: &str) -> String {
    // No exact match - find close suggestions using Jaro-Winkler similarity.
    let mut suggestions: Vec<(&'static str, f64)> = StatementKind::all()
        .iter()
        .map(|k| (k.name(), strsim::jaro_winkler(token, k.name())))
        .filter(|(_, sim)| *sim >= 0.7)
        .collect();
    suggestions.sort_by(|(_, a), (_, b)| b.partial_cmp(a).unwrap());

    if let Some((closest, similarity)) = suggestions.first() {
        if *similarity >= 0.85 {
            format!("unknown statement kind: '{token}'\n  Did you mean: {closest}?")
        } else {
            let names: Vec<&str> = suggestions.iter().take(3).map(|(name, _)| *name).collect();
            format!(
                "unknown statement kind: '{token}'\n  Did you mean one of: {}?",
                names.join(", ")
            )
        }
    } else {
        format!("unknown statement kind: '{token}'")
    }
}

fn resolve_kinds(input: Option<&str>) -> Result<Vec<StatementKind>, Error> {
    match input {
        None => Ok(StatementKind::all().to_vec()),
        Some(s) => parse_kind_list(s).map_err(Error::InvalidConfig),
    }
}

fn check_villager_count(n: u8) {
    if !(2..=20).contains(&n) {
        eprintln!("Error: --n must be between 2 and 20 (2^N masks)");
        std::process::exit(2);
    }
}

fn load_or_build_cache(
    path: Option<&Path>,
    library: &Library,
    n: u8,
    rebuild: bool,
) -> Result<TruthCache, Error> {
    let Some(path) = path else {
        return Ok(TruthCache::build(library));
    };
    if !rebuild && path.exists() {
        match TruthCache::load(path, n) {
            Ok(cache) => {
                if cache.covers(library).is_ok() {
                    eprintln!("Loaded truth cache from {}", path.display());
                    return Ok(cache);
                }
                eprintln!(
                    "Cache at {} does not cover the statement library; rebuilding",
                    path.display()
                );
            }
            Err(e) => eprintln!("Failed to load cache from {}: {e}; rebuilding", path.display()),
        }
    }
    let cache = TruthCache::build(library);
    cache.save(path)?;
    eprintln!(
        "Wrote truth cache ({} statements) to {}",
        cache.len(),
        path.display()
    );
    Ok(cache)
}

fn generate_cmd(args: GenerateArgs) -> Result<(), Error> {
    check_villager_count(args.n);
    if args.statements_min == 0 || args.statements_min > args.statements_max {
        eprintln!("Error: --statements-min must be at least 1 and no larger than --statements-max");
        std::process::exit(2);
    }

    let config = GenerationConfig {
        n: args.n,
        statements_min: args.statements_min,
        statements_max: args.statements_max,
        has_shill: args.has_shill,
        forbid_self_reference: !args.allow_self_reference,
        kinds: resolve_kinds(args.kinds.as_deref())?,
        punctured_scopes: !args.no_punctured_scopes,
        max_attempts: args.max_attempts,
        min_werewolves: args.min_werewolves,
        max_werewolves: args.max_werewolves,
        diverse_statements: args.diverse_statements,
        reject_uniform_kinds: args.reject_uniform_kinds,
        max_count_statements: args.max_count_statements,
        require_pair_statement: args.require_pair_statement,
        ..GenerationConfig::default()
    };
    let library = build_library(&config.library_config());
    let cache = load_or_build_cache(
        args.cache_file.as_deref(),
        &library,
        args.n,
        args.rebuild_cache,
    )?;

    let cancel = AtomicBool::new(false);
    let puzzles = if args.count == 1 {
        vec![generate(&config, &cache, args.seed)?]
    } else {
        generate_batch(
            &config,
            &cache,
            args.seed,
            args.count,
            args.workers,
            &cancel,
        )?
    };
    if puzzles.len() < args.count {
        eprintln!(
            "Generated {} of {} requested puzzles",
            puzzles.len(),
            args.count
        );
    }

    let names = default_names(args.n);
    for puzzle in &puzzles {
        if args.output == "text" {
            println!("{}", puzzle.describe(&names));
        } else {
            println!("{}", puzzle.encode());
        }
        if args.show_solution {
            if let Some(solution) = puzzle.solution {
                print_solution(&solution, args.n, &names);
            }
        }
    }
    Ok(())
}

fn verify_cmd(args: VerifyArgs) -> Result<(), Error> {
    check_villager_count(args.n);
    let puzzle = Puzzle::decode(&args.code, args.n)?;

    // Cache exactly the statements the puzzle uses; arbitrary codes may name
    // scopes the standard library never enumerates.
    let statements: Vec<Statement> = puzzle.statements().cloned().collect();
    let cache = TruthCache::build(&Library {
        n: args.n,
        statements,
    });

    let options = VerifyOptions {
        has_shill: args.has_shill,
        ..VerifyOptions::default()
    };
    let solution = verify(&puzzle, &cache, &options)?;
    let names = default_names(args.n);
    println!("Unique solution found.");
    print_solution(&solution, args.n, &names);
    Ok(())
}

fn build_cache_cmd(args: BuildCacheArgs) -> Result<(), Error> {
    check_villager_count(args.n);
    let library = build_library(&LibraryConfig {
        kinds: resolve_kinds(args.kinds.as_deref())?,
        forbid_self_reference: !args.allow_self_reference,
        punctured_scopes: !args.no_punctured_scopes,
        ..LibraryConfig::standard(args.n)
    });
    let cache = TruthCache::build(&library);
    cache.save(&args.cache_file)?;
    println!(
        "Wrote {} truth masks for N={} to {}",
        cache.len(),
        args.n,
        args.cache_file.display()
    );
    Ok(())
}

fn print_solution(solution: &Solution, n: u8, names: &[String]) {
    let w = solution.role_vector(n);
    let wolves: Vec<String> = w.wolves().map(|i| name_of(names, i)).collect();
    println!("# Werewolves: {}", wolves.join(", "));
    if let Some(shill) = solution.shill {
        println!("# Shill: {}", name_of(names, shill));
    }
}
