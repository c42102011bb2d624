//! Validation of user-supplied text.
//!
//! Each validator returns an [`Invalid`] error carrying a message suitable for showing directly to
//! the user.

use crate::recipe::Category;
use crate::text::{char_len, ellipsize};
use derive_more::Display;
use once_cell::sync::Lazy;
use regex::Regex;
use std::str::FromStr;
use strum::IntoEnumIterator;

/// A validation failure, with a user-facing explanation.
#[derive(Clone, Debug, Display, PartialEq, Eq)]
#[display(fmt = "{}", _0)]
pub struct Invalid(String);

impl std::error::Error for Invalid {}

impl Invalid {
    fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// The kind of text a user is expected to send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputKind {
    General,
    DishName,
    Products,
}

pub fn dish_name(name: &str) -> Result<(), Invalid> {
    if char_len(name.trim()) < 3 {
        return Err(Invalid::new(
            "Название блюда слишком короткое (минимум 3 символа)",
        ));
    }
    if char_len(name) > 100 {
        return Err(Invalid::new(
            "Название блюда слишком длинное (максимум 100 символов)",
        ));
    }
    if name.contains(['<', '>', '{', '}', '[', ']', '\\', '|', '`', '~']) {
        return Err(Invalid::new("Название содержит запрещенные символы"));
    }
    Ok(())
}

pub fn products(products: &str) -> Result<(), Invalid> {
    const FORBIDDEN: [&str; 7] = [
        "http://", "https://", "@", "script", "select", "insert", "delete",
    ];

    if char_len(products.trim()) < 3 {
        return Err(Invalid::new("Список продуктов слишком короткий"));
    }
    if char_len(products) > 500 {
        return Err(Invalid::new(
            "Список продуктов слишком длинный (максимум 500 символов)",
        ));
    }

    let by_comma = products.split(',').filter(|item| !item.trim().is_empty());
    if by_comma.count() < 2 && products.split_whitespace().count() < 2 {
        return Err(Invalid::new("Укажите хотя бы 2 продукта"));
    }

    let lower = products.to_lowercase();
    if FORBIDDEN.iter().any(|word| lower.contains(word)) {
        return Err(Invalid::new(
            "Список продуктов содержит запрещенные слова",
        ));
    }
    Ok(())
}

pub fn category(category: &str) -> Result<(), Invalid> {
    Category::from_str(category).map(|_| ()).map_err(|_| {
        let valid = Category::iter()
            .map(|cat| cat.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Invalid::new(format!("Неизвестная категория. Допустимые: {valid}"))
    })
}

pub fn recipe_text(text: &str) -> Result<(), Invalid> {
    const DANGEROUS_TAGS: [&str; 4] = ["<script>", "<iframe>", "<object>", "<embed>"];

    if char_len(text.trim()) < 10 {
        return Err(Invalid::new(
            "Текст рецепта слишком короткий (минимум 10 символов)",
        ));
    }
    if char_len(text) > 10000 {
        return Err(Invalid::new(
            "Текст рецепта слишком длинный (максимум 10000 символов)",
        ));
    }
    let lower = text.to_lowercase();
    if DANGEROUS_TAGS.iter().any(|tag| lower.contains(tag)) {
        return Err(Invalid::new("Текст содержит запрещенные HTML теги"));
    }
    Ok(())
}

pub fn url(url: &str) -> Result<(), Invalid> {
    static URL: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^https?://(?:[-\w.]|(?:%[\da-fA-F]{2}))+").unwrap());

    if url.is_empty() {
        return Err(Invalid::new("URL не может быть пустым"));
    }
    if !URL.is_match(url) {
        return Err(Invalid::new("Некорректный формат URL"));
    }
    if char_len(url) > 500 {
        return Err(Invalid::new(
            "URL слишком длинный (максимум 500 символов)",
        ));
    }
    Ok(())
}

/// General checks for any message, followed by the checks specific to `kind`.
pub fn user_input(text: &str, kind: InputKind) -> Result<(), Invalid> {
    if text.is_empty() {
        return Err(Invalid::new("Ввод не может быть пустым"));
    }
    if char_len(text) > 1000 {
        return Err(Invalid::new(
            "Сообщение слишком длинное (максимум 1000 символов)",
        ));
    }
    if looks_like_spam(text) {
        return Err(Invalid::new("Сообщение выглядит как спам"));
    }
    match kind {
        InputKind::General => Ok(()),
        InputKind::DishName => dish_name(text),
        InputKind::Products => products(text),
    }
}

/// Heuristic spam check.
///
/// Flags long runs of one character, text dominated by punctuation or capitals, and links to
/// anywhere other than the image hosts the bot itself produces.
pub fn looks_like_spam(text: &str) -> bool {
    const SPECIAL: &str = "!@#$%^&*()_+=|<>?{}[]~";
    static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://").unwrap());

    let len = char_len(text) as f64;

    let mut run = 0;
    let mut prev = None;
    for c in text.chars() {
        run = if Some(c) == prev { run + 1 } else { 1 };
        if run >= 6 {
            return true;
        }
        prev = Some(c);
    }

    let special = text.chars().filter(|c| SPECIAL.contains(*c)).count() as f64;
    if special > len * 0.3 {
        return true;
    }

    if LINK.is_match(text) && !text.contains("unsplash.com") && !text.contains("replicate.com") {
        return true;
    }

    let upper = text.chars().filter(|c| c.is_uppercase()).count() as f64;
    upper > len * 0.7
}

/// Make arbitrary text safe to echo back in an HTML message.
pub fn sanitize_input(text: &str, max: usize) -> String {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let text = text
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace(['"', '`'], "'");
    ellipsize(&text, max)
}
