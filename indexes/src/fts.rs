//! Full-text index: multi-language tokenization, inverted postings, BM25-like scoring, phrase
//! queries, and fuzzy matching (spec §4.H.2).

use std::collections::{BTreeMap, BTreeSet};

use rust_stemmers::{Algorithm, Stemmer};
use unicode_segmentation::UnicodeSegmentation;

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

/// A stemming/stopword language. `Arabic` has no Snowball algorithm in `rust_stemmers`, so it
/// gets a hand-rolled affix stripper instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    English,
    Spanish,
    French,
    German,
    Italian,
    Portuguese,
    Dutch,
    Russian,
    Swedish,
    Norwegian,
    Danish,
    Finnish,
    Turkish,
    Arabic,
}

impl Language {
    fn algorithm(self) -> Option<Algorithm> {
        match self {
            Language::English => Some(Algorithm::English),
            Language::Spanish => Some(Algorithm::Spanish),
            Language::French => Some(Algorithm::French),
            Language::German => Some(Algorithm::German),
            Language::Italian => Some(Algorithm::Italian),
            Language::Portuguese => Some(Algorithm::Portuguese),
            Language::Dutch => Some(Algorithm::Dutch),
            Language::Russian => Some(Algorithm::Russian),
            Language::Swedish => Some(Algorithm::Swedish),
            Language::Norwegian => Some(Algorithm::Norwegian),
            Language::Danish => Some(Algorithm::Danish),
            Language::Finnish => Some(Algorithm::Finnish),
            Language::Turkish => Some(Algorithm::Turkish),
            Language::Arabic => None,
        }
    }

    fn stopwords(self) -> &'static [&'static str] {
        match self {
            Language::English => &[
                "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into",
                "is", "it", "no", "not", "of", "on", "or", "such", "that", "the", "their", "then",
                "there", "these", "they", "this", "to", "was", "will", "with",
            ],
            Language::Spanish => &["el", "la", "de", "que", "y", "en", "los", "las", "un", "una"],
            Language::French => &["le", "la", "de", "et", "les", "des", "un", "une", "du", "en"],
            Language::German => &["der", "die", "das", "und", "in", "den", "von", "zu", "ist"],
            Language::Arabic => &["من", "في", "على", "إلى", "عن", "مع", "هذا", "هذه"],
            _ => &[],
        }
    }
}

/// Strips common Arabic definite-article prefixes and a handful of clitic suffixes. Not a full
/// morphological analyzer — good enough to normalize the common inflections a search index sees.
fn arabic_strip_affixes(word: &str) -> String {
    const PREFIXES: &[&str] = &["وال", "فال", "بال", "كال", "ال", "و", "ف", "ب", "ل"];
    const SUFFIXES: &[&str] = &["هما", "هم", "كم", "نا", "ها", "ه", "ي", "ك"];

    let mut s = word;
    for prefix in PREFIXES {
        if let Some(rest) = s.strip_prefix(prefix) {
            if rest.chars().count() >= 2 {
                s = rest;
                break;
            }
        }
    }
    for suffix in SUFFIXES {
        if let Some(rest) = s.strip_suffix(suffix) {
            if rest.chars().count() >= 2 {
                return rest.to_string();
            }
        }
    }
    s.to_string()
}

/// Tokenization/indexing behavior for one full-text index.
#[derive(Debug, Clone)]
pub struct FtsIndexConfig {
    pub language: Language,
    pub min_word_length: usize,
    pub index_positions: bool,
}

impl Default for FtsIndexConfig {
    fn default() -> Self {
        Self { language: Language::English, min_word_length: 2, index_positions: true }
    }
}

/// Query-time fuzzy matching behavior.
#[derive(Debug, Clone, Copy)]
pub struct FuzzyConfig {
    pub enabled: bool,
    pub min_term_length: usize,
    pub max_distance: u32,
    pub prefix_length: usize,
}

impl Default for FuzzyConfig {
    fn default() -> Self {
        Self { enabled: false, min_term_length: 4, max_distance: 2, prefix_length: 1 }
    }
}

fn stem(language: Language, word: &str) -> String {
    match language.algorithm() {
        Some(algo) => Stemmer::create(algo).stem(word).to_string(),
        None => arabic_strip_affixes(word),
    }
}

/// Runs the tokenization pipeline: Unicode word splitting → lowercasing → stopword filter →
/// stemming → `min_word_length` cutoff.
pub fn tokenize(config: &FtsIndexConfig, text: &str) -> Vec<String> {
    let stopwords: BTreeSet<&str> = config.language.stopwords().iter().copied().collect();
    text.unicode_words()
        .map(|w| w.to_lowercase())
        .filter(|w| !stopwords.contains(w.as_str()))
        .map(|w| stem(config.language, &w))
        .filter(|w| w.chars().count() >= config.min_word_length)
        .collect()
}

#[derive(Debug, Clone, Default)]
struct Posting {
    term_freq: u32,
    positions: Vec<u32>,
}

/// One parsed query clause: a bare term or a quoted phrase, with its required/excluded polarity.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryTerm {
    Term(String),
    Phrase(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Should,
    Required,
    Excluded,
}

#[derive(Debug, Clone)]
pub struct Clause {
    pub polarity: Polarity,
    pub term: QueryTerm,
}

/// Parses a query string into clauses: bare terms, `+required`, `-excluded`, and `"quoted
/// phrases"` (themselves optionally prefixed with `+`/`-`). A single-word phrase degrades to an
/// ordinary term.
pub fn parse_query(query: &str) -> Vec<Clause> {
    let mut clauses = Vec::new();
    let chars: Vec<char> = query.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i].is_whitespace() {
            i += 1;
            continue;
        }
        let polarity = match chars[i] {
            '+' => {
                i += 1;
                Polarity::Required
            }
            '-' => {
                i += 1;
                Polarity::Excluded
            }
            _ => Polarity::Should,
        };
        if i >= chars.len() {
            break;
        }
        if chars[i] == '"' {
            i += 1;
            let start = i;
            while i < chars.len() && chars[i] != '"' {
                i += 1;
            }
            let phrase: String = chars[start..i].iter().collect();
            if i < chars.len() {
                i += 1;
            }
            let words: Vec<&str> = phrase.split_whitespace().collect();
            let term = if words.len() <= 1 {
                QueryTerm::Term(phrase.trim().to_string())
            } else {
                QueryTerm::Phrase(words.into_iter().map(|w| w.to_string()).collect())
            };
            clauses.push(Clause { polarity, term });
        } else {
            let start = i;
            while i < chars.len() && !chars[i].is_whitespace() {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            clauses.push(Clause { polarity, term: QueryTerm::Term(word) });
        }
    }
    clauses
}

/// A scored full-text search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub doc_id: String,
    pub score: f64,
}

/// Bounded Damerau-Levenshtein distance. Stops reporting past `max + 1`, which the caller treats
/// as "exceeded the bound" (spec §4.H.2).
pub fn bounded_damerau_levenshtein(a: &str, b: &str, max: u32) -> u32 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (n, m) = (a.len(), b.len());
    let sentinel = max + 1;
    if (n as i64 - m as i64).unsigned_abs() as u32 > max {
        return sentinel;
    }

    let mut d = vec![vec![0u32; m + 1]; n + 1];
    for i in 0..=n {
        d[i][0] = i as u32;
    }
    for j in 0..=m {
        d[0][j] = j as u32;
    }
    for i in 1..=n {
        for j in 1..=m {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            let mut v = (d[i - 1][j] + 1).min(d[i][j - 1] + 1).min(d[i - 1][j - 1] + cost);
            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                v = v.min(d[i - 2][j - 2] + 1);
            }
            d[i][j] = v;
        }
    }
    d[n][m].min(sentinel)
}

/// An in-memory inverted index for one collection's full-text field(s).
#[derive(Debug)]
pub struct FtsIndex {
    config: FtsIndexConfig,
    postings: BTreeMap<String, BTreeMap<String, Posting>>,
    doc_lengths: BTreeMap<String, u32>,
}

impl FtsIndex {
    /// Creates an empty index.
    pub fn new(config: FtsIndexConfig) -> Self {
        Self { config, postings: BTreeMap::new(), doc_lengths: BTreeMap::new() }
    }

    fn avg_doc_len(&self) -> f64 {
        if self.doc_lengths.is_empty() {
            return 0.0;
        }
        self.doc_lengths.values().map(|&l| l as f64).sum::<f64>() / self.doc_lengths.len() as f64
    }

    /// Tokenizes and indexes `text` under `doc_id`, replacing any prior content for that document.
    pub fn index_document(&mut self, doc_id: &str, text: &str) {
        self.remove_document(doc_id);
        let tokens = tokenize(&self.config, text);
        self.doc_lengths.insert(doc_id.to_string(), tokens.len() as u32);
        for (pos, term) in tokens.into_iter().enumerate() {
            let postings = self.postings.entry(term).or_default();
            let posting = postings.entry(doc_id.to_string()).or_default();
            posting.term_freq += 1;
            if self.config.index_positions {
                posting.positions.push(pos as u32);
            }
        }
    }

    /// Removes all postings for `doc_id`.
    pub fn remove_document(&mut self, doc_id: &str) {
        self.doc_lengths.remove(doc_id);
        for postings in self.postings.values_mut() {
            postings.remove(doc_id);
        }
        self.postings.retain(|_, postings| !postings.is_empty());
    }

    fn idf(&self, term: &str) -> f64 {
        let n = self.doc_lengths.len() as f64;
        let df = self.postings.get(term).map(|p| p.len()).unwrap_or(0) as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn bm25_for_term(&self, term: &str, doc_id: &str) -> f64 {
        let Some(posting) = self.postings.get(term).and_then(|p| p.get(doc_id)) else {
            return 0.0;
        };
        let tf = posting.term_freq as f64;
        let doc_len = *self.doc_lengths.get(doc_id).unwrap_or(&0) as f64;
        let avgdl = self.avg_doc_len().max(1.0);
        let idf = self.idf(term);
        idf * (tf * (BM25_K1 + 1.0)) / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * doc_len / avgdl))
    }

    /// Candidate vocabulary terms fuzzily matching `term`, each paired with its scoring penalty
    /// (`1.0` for an exact match). Empty when fuzzy matching does not apply to this term.
    fn fuzzy_candidates(&self, term: &str, fuzzy: FuzzyConfig) -> Vec<(String, f64)> {
        let mut out = Vec::new();
        if self.postings.contains_key(term) {
            out.push((term.to_string(), 1.0));
        }
        if !fuzzy.enabled || term.chars().count() < fuzzy.min_term_length {
            return out;
        }
        let prefix: String = term.chars().take(fuzzy.prefix_length).collect();
        for candidate in self.postings.keys() {
            if candidate == term {
                continue;
            }
            let candidate_prefix: String = candidate.chars().take(fuzzy.prefix_length).collect();
            if candidate_prefix != prefix {
                continue;
            }
            let dist = bounded_damerau_levenshtein(term, candidate, fuzzy.max_distance);
            if dist <= fuzzy.max_distance {
                let penalty = (fuzzy.max_distance - dist + 1) as f64 / (fuzzy.max_distance + 1) as f64;
                out.push((candidate.clone(), penalty));
            }
        }
        out
    }

    fn docs_containing_term(&self, term: &str) -> BTreeSet<String> {
        self.postings.get(term).map(|p| p.keys().cloned().collect()).unwrap_or_default()
    }

    fn docs_containing_phrase(&self, phrase: &[String]) -> BTreeSet<String> {
        if phrase.is_empty() {
            return BTreeSet::new();
        }
        if !self.config.index_positions {
            return phrase
                .iter()
                .map(|t| self.docs_containing_term(t))
                .reduce(|a, b| a.intersection(&b).cloned().collect())
                .unwrap_or_default();
        }
        let mut candidates: Option<BTreeSet<String>> = None;
        for term in phrase {
            let docs = self.docs_containing_term(term);
            candidates = Some(match candidates {
                None => docs,
                Some(prev) => prev.intersection(&docs).cloned().collect(),
            });
        }
        let candidates = candidates.unwrap_or_default();
        candidates
            .into_iter()
            .filter(|doc_id| self.phrase_positions_align(phrase, doc_id))
            .collect()
    }

    fn phrase_positions_align(&self, phrase: &[String], doc_id: &str) -> bool {
        let Some(first_positions) = self.postings.get(&phrase[0]).and_then(|p| p.get(doc_id)) else {
            return false;
        };
        'outer: for &start in &first_positions.positions {
            for (offset, term) in phrase.iter().enumerate().skip(1) {
                let Some(posting) = self.postings.get(term).and_then(|p| p.get(doc_id)) else {
                    continue 'outer;
                };
                if !posting.positions.contains(&(start + offset as u32)) {
                    continue 'outer;
                }
            }
            return true;
        }
        false
    }

    /// Searches the index, returning hits sorted by descending score.
    pub fn search(&self, query: &str, fuzzy: FuzzyConfig) -> Vec<SearchHit> {
        let clauses = parse_query(query);
        let mut required: Vec<BTreeSet<String>> = Vec::new();
        let mut excluded: BTreeSet<String> = BTreeSet::new();
        let mut scores: BTreeMap<String, f64> = BTreeMap::new();

        for clause in &clauses {
            match &clause.term {
                QueryTerm::Term(raw) => {
                    let stemmed = stem(self.config.language, &raw.to_lowercase());
                    match clause.polarity {
                        Polarity::Excluded => excluded.extend(self.docs_containing_term(&stemmed)),
                        Polarity::Required => {
                            required.push(self.docs_containing_term(&stemmed));
                            for (term, penalty) in self.fuzzy_candidates(&stemmed, fuzzy) {
                                for doc_id in self.docs_containing_term(&term) {
                                    *scores.entry(doc_id.clone()).or_default() +=
                                        self.bm25_for_term(&term, &doc_id) * penalty;
                                }
                            }
                        }
                        Polarity::Should => {
                            for (term, penalty) in self.fuzzy_candidates(&stemmed, fuzzy) {
                                for doc_id in self.docs_containing_term(&term) {
                                    *scores.entry(doc_id.clone()).or_default() +=
                                        self.bm25_for_term(&term, &doc_id) * penalty;
                                }
                            }
                        }
                    }
                }
                QueryTerm::Phrase(words) => {
                    let stemmed: Vec<String> =
                        words.iter().map(|w| stem(self.config.language, &w.to_lowercase())).collect();
                    let docs = self.docs_containing_phrase(&stemmed);
                    match clause.polarity {
                        Polarity::Excluded => excluded.extend(docs),
                        Polarity::Required => {
                            for doc_id in &docs {
                                let boost: f64 =
                                    stemmed.iter().map(|t| self.bm25_for_term(t, doc_id)).sum();
                                *scores.entry(doc_id.clone()).or_default() += boost * 1.5;
                            }
                            required.push(docs);
                        }
                        Polarity::Should => {
                            for doc_id in &docs {
                                let boost: f64 =
                                    stemmed.iter().map(|t| self.bm25_for_term(t, doc_id)).sum();
                                *scores.entry(doc_id.clone()).or_default() += boost * 1.5;
                            }
                        }
                    }
                }
            }
        }

        let allowed: BTreeSet<String> = if required.is_empty() {
            scores.keys().cloned().collect()
        } else {
            let mut base = required[0].clone();
            for req in &required[1..] {
                base = base.intersection(req).cloned().collect();
            }
            base
        };

        let mut hits: Vec<SearchHit> = allowed
            .into_iter()
            .filter(|doc_id| !excluded.contains(doc_id))
            .map(|doc_id| {
                let score = *scores.get(&doc_id).unwrap_or(&0.0);
                SearchHit { doc_id, score }
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits
    }

    /// Number of distinct documents currently indexed.
    pub fn doc_count(&self) -> usize {
        self.doc_lengths.len()
    }
}
