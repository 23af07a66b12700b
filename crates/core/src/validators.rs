//! Field validators for questionnaire answers.
//!
//! Every validator is a pure `raw text -> Result<normalized, ValidationError>`
//! function. A rejection never touches session state; the engine turns it into
//! a re-prompt using [`ValidationError::user_message`].

use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("answer is empty")]
    Empty,
    #[error("identification number must have 11 digits, got {digits}")]
    InvalidCpf { digits: usize },
    #[error("`{value}` is not one of {vocabulary:?}")]
    NotInVocabulary { value: String, vocabulary: Vec<&'static str> },
    #[error("postal code must have 8 digits")]
    InvalidPostalCode,
}

impl ValidationError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Empty => "Não recebi nenhuma resposta. Pode digitar novamente?".to_string(),
            Self::InvalidCpf { .. } => {
                "CPF inválido. Digite no formato 123.456.789-00".to_string()
            }
            Self::NotInVocabulary { vocabulary, .. } => {
                format!("Opção inválida. Responda com uma destas: {}.", vocabulary.join(", "))
            }
            Self::InvalidPostalCode => "CEP inválido. Digite no formato 00000-000".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VocabularyEntry {
    pub canonical: &'static str,
    pub aliases: &'static [&'static str],
}

/// Closed set of accepted answers for an enumerated field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Vocabulary {
    pub name: &'static str,
    pub entries: &'static [VocabularyEntry],
}

impl Vocabulary {
    pub fn canonical_values(&self) -> Vec<&'static str> {
        self.entries.iter().map(|entry| entry.canonical).collect()
    }

    fn resolve(&self, folded: &str) -> Option<&'static str> {
        self.entries.iter().find_map(|entry| {
            let hit = fold(entry.canonical) == folded
                || entry.aliases.iter().any(|alias| fold(alias) == folded);
            hit.then_some(entry.canonical)
        })
    }
}

pub const FUEL: Vocabulary = Vocabulary {
    name: "fuel",
    entries: &[
        VocabularyEntry { canonical: "Gasolina", aliases: &[] },
        VocabularyEntry { canonical: "Etanol", aliases: &["alcool"] },
        VocabularyEntry { canonical: "Diesel", aliases: &[] },
        VocabularyEntry { canonical: "Flex", aliases: &[] },
        VocabularyEntry { canonical: "GNV", aliases: &["gas natural"] },
    ],
};

pub const LEAD_SOURCE: Vocabulary = Vocabulary {
    name: "lead_source",
    entries: &[
        VocabularyEntry { canonical: "Instagram", aliases: &["1", "insta"] },
        VocabularyEntry { canonical: "Facebook", aliases: &["2", "face"] },
        VocabularyEntry { canonical: "Google", aliases: &["3"] },
        VocabularyEntry { canonical: "Outros", aliases: &["4", "outro"] },
    ],
};

/// Validator selected by a questionnaire node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    FreeText,
    Cpf,
    Choice(&'static Vocabulary),
    PostalCode,
}

impl FieldKind {
    pub fn validate(&self, raw: &str) -> Result<String, ValidationError> {
        match self {
            Self::FreeText => free_text(raw),
            Self::Cpf => cpf(raw),
            Self::Choice(vocabulary) => choice(raw, vocabulary),
            Self::PostalCode => postal_code(raw),
        }
    }
}

pub fn free_text(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }
    Ok(trimmed.to_string())
}

/// Normalizes a CPF to `000.000.000-00`. Dots, hyphens and whitespace are
/// separators; anything else makes the input invalid.
pub fn cpf(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }

    let mut digits = String::with_capacity(11);
    for ch in trimmed.chars() {
        match ch {
            '0'..='9' => digits.push(ch),
            '.' | '-' => {}
            ch if ch.is_whitespace() => {}
            _ => return Err(ValidationError::InvalidCpf { digits: digits.len() }),
        }
    }

    if digits.len() != 11 {
        return Err(ValidationError::InvalidCpf { digits: digits.len() });
    }

    Ok(format!("{}.{}.{}-{}", &digits[0..3], &digits[3..6], &digits[6..9], &digits[9..11]))
}

pub fn choice(raw: &str, vocabulary: &Vocabulary) -> Result<String, ValidationError> {
    let folded = fold(raw);
    if folded.is_empty() {
        return Err(ValidationError::Empty);
    }

    vocabulary.resolve(&folded).map(str::to_string).ok_or_else(|| {
        ValidationError::NotInVocabulary {
            value: raw.trim().to_string(),
            vocabulary: vocabulary.canonical_values(),
        }
    })
}

/// Accepts `00000000` or `00000-000` and renders the hyphenated form.
pub fn postal_code(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }

    let digits = match trimmed.split_once('-') {
        Some((head, tail)) if head.len() == 5 && tail.len() == 3 => format!("{head}{tail}"),
        Some(_) => return Err(ValidationError::InvalidPostalCode),
        None => trimmed.to_string(),
    };

    if digits.len() != 8 || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(ValidationError::InvalidPostalCode);
    }

    Ok(format!("{}-{}", &digits[0..5], &digits[5..8]))
}

/// Case- and accent-insensitive comparison key for short answers.
pub fn fold(text: &str) -> String {
    text.trim()
        .chars()
        .flat_map(char::to_lowercase)
        .map(|ch| match ch {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
