//! Three-way reconciliation between a freshly parsed `.env` and the
//! previously generated `.env.example`.
//!
//! The reconciler is a total, deterministic function over token streams: it
//! matches keys exactly, detects renames by fuzzy similarity, preserves
//! manually edited ("sticky") destination values, moves removed keys into a
//! time-boxed graveyard section, and honors permanent tombstones. `today` is
//! injected by the caller, never read from a clock, so every run is
//! reproducible.

use std::collections::HashSet;

use chrono::NaiveDate;

#[cfg(feature = "tracing")]
use tracing::{debug, trace};

use crate::infer::{InferenceConfig, classify, placeholder};
use crate::lexer::{Directive, DirectiveToken, KeyValueToken, ParsedFile, Quote, Token};

/// Minimum similarity ratio for a rename to be recognized. Strictly greater
/// than this value is required.
pub const FUZZY_MATCH_THRESHOLD: f64 = 0.8;

/// Days a graveyard entry survives before being pruned.
pub const GRAVEYARD_TTL_DAYS: i64 = 14;

/// Keys shorter than this never participate in fuzzy matching. A two-letter
/// key is a subsequence of far too many unrelated keys to rename safely.
pub const FUZZY_MIN_KEY_LEN: usize = 4;

/// Length of the longest common subsequence of `a` and `b`.
fn lcs_length(a: &[char], b: &[char]) -> usize {
  let mut prev = vec![0usize; b.len() + 1];
  let mut curr = vec![0usize; b.len() + 1];
  for &ca in a {
    for (j, &cb) in b.iter().enumerate() {
      curr[j + 1] = if ca == cb {
        prev[j] + 1
      } else {
        curr[j].max(prev[j + 1])
      };
    }
    std::mem::swap(&mut prev, &mut curr);
  }
  prev[b.len()]
}

/// Similarity ratio between two keys, case-insensitive, in `[0.0, 1.0]`.
///
/// Computed as the longest-common-subsequence length normalized by the
/// shorter key length, so an abbreviation and its expansion
/// (`DB_PASS` vs `DATABASE_PASSWORD`) score high while unrelated keys do not.
pub fn similarity(a: &str, b: &str) -> f64 {
  let a: Vec<char> = a.to_lowercase().chars().collect();
  let b: Vec<char> = b.to_lowercase().chars().collect();
  let shorter = a.len().min(b.len());
  if shorter == 0 {
    return 0.0;
  }

  lcs_length(&a, &b) as f64 / shorter as f64
}

/// Best fuzzy match for `key` among `candidates`, or `None` when no candidate
/// exceeds the threshold. Keys with fewer than [`FUZZY_MIN_KEY_LEN`]
/// characters on either side never match. Ties are broken deterministically:
/// the highest ratio wins, and among equal ratios the earliest candidate in
/// iteration order wins.
pub fn find_fuzzy_match<'a, I>(key: &str, candidates: I) -> Option<&'a str>
where
  I: IntoIterator<Item = &'a str>,
{
  let key_len = key.chars().count();
  let mut best: Option<(&str, f64)> = None;
  for candidate in candidates {
    if key_len.min(candidate.chars().count()) < FUZZY_MIN_KEY_LEN {
      continue;
    }
    let ratio = similarity(key, candidate);
    if ratio <= FUZZY_MATCH_THRESHOLD {
      continue;
    }
    match best {
      Some((_, best_ratio)) if ratio <= best_ratio => {}
      _ => best = Some((candidate, ratio)),
    }
  }
  best.map(|(candidate, _)| candidate)
}

/// Pairs each new key with the tombstoned key it resembles, for surfacing
/// probable renames of deprecated keys to the user.
pub fn find_fuzzy_tombstone_matches<'a, 'b>(
  new_keys: impl IntoIterator<Item = &'a str>,
  tombstoned: &[&'b str],
) -> Vec<(&'a str, &'b str)> {
  let mut matches = Vec::new();
  for key in new_keys {
    if let Some(hit) = find_fuzzy_match(key, tombstoned.iter().copied()) {
      matches.push((key, hit));
    }
  }
  matches
}

fn is_placeholder_shaped(value: &str) -> bool {
  value.len() > 2 && value.starts_with('<') && value.ends_with('>')
}

fn is_expired(date: NaiveDate, today: NaiveDate) -> bool {
  (today - date).num_days() > GRAVEYARD_TTL_DAYS
}

/// Produces the new destination token stream.
///
/// `source` is the parsed private file (or a synthetic aggregation of
/// several), `previous` the parsed destination as it exists on disk, `today`
/// the injected current date used for graveyard bookkeeping.
pub fn reconcile(
  source: &ParsedFile,
  previous: Option<&ParsedFile>,
  today: NaiveDate,
  inference: &InferenceConfig,
) -> ParsedFile {
  let empty = ParsedFile::default();
  let prev = previous.unwrap_or(&empty);

  let source_keys = source.key_map();
  let prev_keys = prev.key_map();
  let tombstoned: HashSet<&str> = prev.tombstoned_keys().into_iter().collect();

  // Graveyard entries that will survive this run: not expired, and not
  // resurrected by the key reappearing in the source.
  let surviving_graveyard: HashSet<&str> = prev
    .graveyard()
    .into_iter()
    .filter(|(key, date)| {
      !is_expired(*date, today) && !(source_keys.contains_key(key) && !tombstoned.contains(key))
    })
    .map(|(key, _)| key)
    .collect();

  #[cfg(feature = "tracing")]
  debug!(
    source_keys = source_keys.len(),
    previous_keys = prev_keys.len(),
    tombstoned = tombstoned.len(),
    "reconciling"
  );

  let mut out: Vec<Token> = Vec::with_capacity(prev.tokens.len() + source_keys.len());
  let mut consumed: HashSet<&str> = HashSet::new();
  let mut emitted_prev: HashSet<&str> = HashSet::new();
  let mut emitted_graveyard: HashSet<&str> = HashSet::new();
  let mut pending_graveyard: Vec<String> = Vec::new();

  for token in &prev.tokens {
    match token {
      Token::KeyValue(kv) => {
        let key = kv.key.as_str();
        if !emitted_prev.insert(key) {
          // Duplicate destination key: collapsed into the first occurrence,
          // which already used the authoritative last-seen value.
          continue;
        }
        if tombstoned.contains(key) {
          // Stale body line for a deprecated key.
          continue;
        }

        // Last-seen-wins: the authoritative token for this key.
        let auth = prev_keys[key];

        if let Some(src) = source_keys.get(key) {
          if consumed.insert(key) {
            out.push(carry(auth, key, &src.value, false, inference));
            continue;
          }
        }

        // No exact match: try to recognize a rename among source keys that
        // have no exact counterpart of their own.
        let rename = find_fuzzy_match(
          key,
          source_keys
            .keys()
            .copied()
            .filter(|k| !consumed.contains(k) && !prev_keys.contains_key(k) && !tombstoned.contains(k)),
        );

        if let Some(new_key) = rename {
          #[cfg(feature = "tracing")]
          trace!(old = key, new = new_key, "rename detected");
          consumed.insert(new_key);
          out.push(carry(auth, new_key, &source_keys[new_key].value, true, inference));
        } else if !surviving_graveyard.contains(key) {
          // Truly removed: the line is dropped and the key buried below.
          pending_graveyard.push(key.to_string());
        }
      }
      Token::Directive(d) => match &d.directive {
        Directive::Graveyard { key, .. } => {
          let key = key.as_str();
          if surviving_graveyard.contains(key) && emitted_graveyard.insert(key) {
            out.push(token.clone());
          }
        }
        _ => out.push(token.clone()),
      },
      _ => out.push(token.clone()),
    }
  }

  // New keys: unconsumed, not blocked by a tombstone, appended in source
  // first-seen order just before the deprecated section.
  let fresh: Vec<Token> = source_keys
    .iter()
    .filter(|(key, _)| !consumed.contains(*key) && !tombstoned.contains(*key))
    .map(|(key, src)| {
      let class = classify(&src.value, inference);
      let value = placeholder(key, class, &src.value);
      let quote = if value == src.value { src.quote } else { Quote::None };
      Token::KeyValue(KeyValueToken::new(*key, value, src.export, quote, None, "\n"))
    })
    .collect();

  if !fresh.is_empty() {
    match section_header_position(&out) {
      Some(idx) => {
        for (offset, token) in fresh.into_iter().enumerate() {
          out.insert(idx + offset, token);
        }
      }
      None => {
        if let Some(last) = out.last_mut() {
          last.ensure_newline();
        }
        out.extend(fresh);
      }
    }
  }

  if !pending_graveyard.is_empty() {
    pending_graveyard.sort();
    pending_graveyard.dedup();
    let entries: Vec<Token> = pending_graveyard
      .iter()
      .filter(|key| !emitted_graveyard.contains(key.as_str()))
      .map(|key| Token::Directive(DirectiveToken::graveyard(key, today)))
      .collect();

    match section_header_position(&out) {
      Some(idx) => {
        for (offset, token) in entries.into_iter().enumerate() {
          out.insert(idx + 1 + offset, token);
        }
      }
      None => {
        if let Some(last) = out.last_mut() {
          last.ensure_newline();
        }
        if !matches!(out.last(), Some(Token::Blank(_)) | None) {
          out.push(Token::Blank("\n".to_string()));
        }
        out.push(Token::Directive(DirectiveToken::section_header()));
        out.extend(entries);
      }
    }
  }

  ParsedFile { tokens: out }
}

fn section_header_position(tokens: &[Token]) -> Option<usize> {
  tokens.iter().position(|token| {
    matches!(
      token,
      Token::Directive(DirectiveToken {
        directive: Directive::SectionHeader,
        ..
      })
    )
  })
}

/// Carries a destination entry forward under `key`, applying the sticky rule:
/// a value that is neither placeholder-shaped nor equal to the freshly
/// computed placeholder was edited by hand and is preserved.
fn carry(
  auth: &KeyValueToken,
  key: &str,
  source_value: &str,
  renamed: bool,
  inference: &InferenceConfig,
) -> Token {
  let class = classify(source_value, inference);
  let fresh = placeholder(key, class, source_value);
  let sticky = !is_placeholder_shaped(&auth.value) && auth.value != fresh;

  if !renamed && (sticky || auth.value == fresh) {
    // Untouched: reprint the original bytes.
    return Token::KeyValue(auth.clone());
  }

  let value = if sticky { auth.value.clone() } else { fresh };
  let quote = if sticky {
    auth.quote
  } else if value == source_value {
    auth.quote
  } else {
    Quote::None
  };

  Token::KeyValue(KeyValueToken::new(
    key,
    value,
    auth.export,
    quote,
    auth.trailing_comment.clone(),
    auth.terminator.clone(),
  ))
}

/// Adds a permanent tombstone for `key`, dropping any live line or graveyard
/// entry it still has.
pub fn add_tombstone(file: &ParsedFile, key: &str, today: NaiveDate) -> ParsedFile {
  let mut tokens: Vec<Token> = file
    .tokens
    .iter()
    .filter(|token| match token {
      Token::KeyValue(kv) => kv.key != key,
      Token::Directive(DirectiveToken {
        directive: Directive::Graveyard { key: k, .. },
        ..
      }) => k != key,
      _ => true,
    })
    .cloned()
    .collect();

  let entry = Token::Directive(DirectiveToken::tombstone(key, today));
  match section_header_position(&tokens) {
    Some(idx) => tokens.insert(idx + 1, entry),
    None => {
      if let Some(last) = tokens.last_mut() {
        last.ensure_newline();
      }
      if !matches!(tokens.last(), Some(Token::Blank(_)) | None) {
        tokens.push(Token::Blank("\n".to_string()));
      }
      tokens.push(Token::Directive(DirectiveToken::section_header()));
      tokens.push(entry);
    }
  }

  ParsedFile { tokens }
}

/// Removes the tombstone for `key`, allowing it to be re-added on a later
/// sync.
pub fn remove_tombstone(file: &ParsedFile, key: &str) -> ParsedFile {
  let tokens = file
    .tokens
    .iter()
    .filter(|token| {
      !matches!(
        token,
        Token::Directive(DirectiveToken {
          directive: Directive::Tombstone { key: k, .. },
          ..
        }) if k == key
      )
    })
    .cloned()
    .collect();
  ParsedFile { tokens }
}
