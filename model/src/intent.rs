//! Guessing what a free-text message is asking for.

use once_cell::sync::Lazy;
use regex::Regex;

/// What a user seems to want from a text message.
#[derive(Clone, Debug, PartialEq)]
pub enum Intent {
    Unknown,
    /// Small talk: greetings, thanks, requests for help.
    Greeting,
    /// A request for the recipe of a specific dish.
    RecipeRequest { dish: String },
    /// A list of products the user has on hand.
    ProductsList {
        products: String,
        /// Whether the list was only recognized by the product names it mentions.
        inferred: bool,
    },
}

impl Intent {
    /// How sure the detector is of this intent, between 0 and 1.
    pub fn confidence(&self) -> f32 {
        match self {
            Self::Unknown => 0.,
            Self::Greeting => 0.9,
            Self::RecipeRequest { .. } => 0.85,
            Self::ProductsList {
                inferred: false, ..
            } => 0.8,
            Self::ProductsList { inferred: true, .. } => 0.7,
        }
    }
}

const STOP_WORDS: [&str; 18] = [
    "привет",
    "здравствуйте",
    "здравствуй",
    "добрый",
    "вечер",
    "утро",
    "день",
    "пока",
    "до свидания",
    "спасибо",
    "благодарю",
    "пожалуйста",
    "помощь",
    "help",
    "start",
    "старт",
    "меню",
    "что ты умеешь",
];

const ACTION_STEMS: [&str; 7] = ["дай", "хочу", "приготовь", "сделай", "научи", "покажи", "как"];

const PRODUCT_STEMS: [&str; 23] = [
    "яйц", "молок", "мук", "сахар", "соль", "масл", "картош", "помидор", "огур", "лук", "чеснок",
    "мяс", "рыб", "куриц", "овощ", "фрукт", "сыр", "хлеб", "макарон", "рис", "греч", "специ",
    "трав",
];

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|pattern| Regex::new(&format!("(?i){pattern}")).unwrap())
        .collect()
}

static RECIPE_REQUEST: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"^дай\s+рецепт\s+(.+)$",
        r"^рецепт\s+(.+)$",
        r"^как\s+приготовить\s+(.+)$",
        r"^как\s+сделать\s+(.+)$",
        r"^хочу\s+приготовить\s+(.+)$",
        r"^хочу\s+сделать\s+(.+)$",
        r"^готовим\s+(.+)$",
        r"^приготовь\s+(.+)$",
        r"^сделай\s+(.+)$",
        r"^как\s+готовить\s+(.+)$",
        r"^научи\s+готовить\s+(.+)$",
        r"^рецептик\s+(.+)$",
        r"^recipe\s+for\s+(.+)$",
        r"^how\s+to\s+cook\s+(.+)$",
        r"^how\s+to\s+make\s+(.+)$",
        r"^i\s+want\s+to\s+cook\s+(.+)$",
        r"^i\s+want\s+to\s+make\s+(.+)$",
        r"^cook\s+(.+)$",
        r"^make\s+(.+)$",
    ])
});

static PRODUCTS_PREFIX: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"^у\s+меня\s+есть\s+(.+)$",
        r"^имеется\s+(.+)$",
        r"^в\s+наличии\s+(.+)$",
        r"^продукты\s*:\s*(.+)$",
        r"^ингредиенты\s*:\s*(.+)$",
        r"^i\s+have\s+(.+)$",
        r"^products?\s*:\s*(.+)$",
        r"^ingredients?\s*:\s*(.+)$",
    ])
});

static FILLER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:пожалуйста|please|мне|мог бы ты|could you)\b").unwrap());
static EDGE_PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\s,:;.\-!?]+|[\s,:;.\-!?]+$").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static NOT_PRODUCT_CHAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s,.\-]").unwrap());

/// Rule-based intent detection for free-text messages.
#[derive(Clone, Copy, Debug, Default)]
pub struct IntentDetector;

impl IntentDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn detect(&self, text: &str) -> Intent {
        let text = text.trim().to_lowercase();
        if text.chars().count() < 2 {
            return Intent::Unknown;
        }

        if STOP_WORDS.iter().any(|word| text.contains(word)) {
            return Intent::Greeting;
        }

        if let Some(dish) = dish_name(&text) {
            return Intent::RecipeRequest { dish };
        }

        if is_products_list(&text) {
            return Intent::ProductsList {
                products: clean_products(&text),
                inferred: false,
            };
        }

        if mentions_products(&text) {
            return Intent::ProductsList {
                products: text,
                inferred: true,
            };
        }

        Intent::Unknown
    }
}

fn dish_name(text: &str) -> Option<String> {
    let dish = RECIPE_REQUEST
        .iter()
        .find_map(|pattern| pattern.captures(text))?
        .get(1)?
        .as_str()
        .trim();
    let dish = FILLER.replace_all(dish, "");
    let dish = EDGE_PUNCTUATION.replace_all(&dish, "");

    let mut chars = dish.chars();
    let dish = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => return None,
    };
    let dish = dish.trim();
    if dish.is_empty() {
        None
    } else {
        Some(dish.into())
    }
}

fn is_products_list(text: &str) -> bool {
    if PRODUCTS_PREFIX.iter().any(|pattern| pattern.is_match(text)) {
        return true;
    }

    let commas = text.matches(',').count();
    let conjunctions = text.matches(" и ").count() + text.matches(" and ").count();
    if commas >= 2 || (commas >= 1 && conjunctions >= 1) {
        return true;
    }

    text.split_whitespace().count() <= 10 && !ACTION_STEMS.iter().any(|stem| text.contains(stem))
}

fn mentions_products(text: &str) -> bool {
    let words = text.split_whitespace().collect::<Vec<_>>();
    let matches = PRODUCT_STEMS
        .iter()
        .filter(|stem| words.iter().any(|word| word.starts_with(*stem)))
        .count();
    matches >= 2
}

fn clean_products(text: &str) -> String {
    let text = PRODUCTS_PREFIX
        .iter()
        .find_map(|pattern| Some(pattern.captures(text)?.get(1)?.as_str()))
        .unwrap_or(text);
    let text = WHITESPACE.replace_all(text, " ");
    let text = NOT_PRODUCT_CHAR.replace_all(&text, "");
    text.trim().into()
}
