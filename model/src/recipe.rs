//! Dish categories, dish suggestions and facts recovered from recipe text.

use crate::store::Favorite;
use crate::text::parse_duration;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use strum::{Display, EnumIter, EnumString};

/// A category of dishes the bot can suggest.
#[derive(
    Clone,
    Copy,
    Debug,
    Display,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    EnumString,
    Deserialize,
    Serialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Breakfast,
    Soup,
    Main,
    Salad,
    Snack,
    Dessert,
    Drink,
    Sauce,
    /// A full lunch: soup, main course, salad and a drink.
    Mix,
}

impl Category {
    /// The button label for this category.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Breakfast => "🍳 Завтраки",
            Self::Soup => "🍲 Супы",
            Self::Main => "🍝 Вторые блюда",
            Self::Salad => "🥗 Салаты",
            Self::Snack => "🥪 Закуски",
            Self::Dessert => "🍰 Десерты",
            Self::Drink => "🥤 Напитки",
            Self::Sauce => "🍾 Соусы",
            Self::Mix => "🍱 Комплексный обед",
        }
    }

    /// The label for a category key, which may not be one we know.
    ///
    /// Category keys come back from the language model, so unknown keys are displayed as the key
    /// itself with a capital first letter.
    pub fn label_for(key: &str) -> String {
        match Self::from_str(key) {
            Ok(category) => category.label().into(),
            Err(_) => {
                let mut chars = key.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
        }
    }
}

/// A dish suggested for the user's products.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Dish {
    pub name: String,
    #[serde(default)]
    pub desc: String,
}

/// How hard a recipe is to cook.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Difficulty {
    #[strum(serialize = "легко")]
    Easy,
    #[strum(serialize = "средне")]
    Medium,
    #[strum(serialize = "сложно")]
    Hard,
}

/// Facts about a recipe recovered from its generated text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecipeMetadata {
    pub difficulty: Option<Difficulty>,
    /// Total cooking time in minutes.
    pub cooking_time: Option<u32>,
    pub servings: Option<u32>,
}

impl RecipeMetadata {
    /// Scan a recipe for its difficulty, cooking time and number of servings.
    ///
    /// Recipes produced by [`Chef`](crate::chef::Chef) have a summary line like
    /// `⏱ Время: 40 минут | 🪦 Сложность: средняя | 👥 Порции: 4 человека`; fields from that line
    /// are preferred, and free-text keywords are used when it is missing.
    pub fn extract(text: &str) -> Self {
        static TIME: Lazy<[(Regex, u32); 4]> = Lazy::new(|| {
            [
                (Regex::new(r"(\d+)\s*минут").unwrap(), 1),
                (Regex::new(r"(\d+)\s*мин").unwrap(), 1),
                (Regex::new(r"(\d+)\s*часа?").unwrap(), 60),
                (Regex::new(r"(\d+)\s*ч\b").unwrap(), 60),
            ]
        });
        static SERVINGS: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"(\d+)\s*(?:порци|персон|человек|servings|people)").unwrap()
        });

        let lower = text.to_lowercase();
        let segments = lower
            .lines()
            .flat_map(|line| line.split('|'))
            .collect::<Vec<_>>();
        let segment = |label: &str| segments.iter().find(|seg| seg.contains(label)).copied();

        let difficulty = segment("сложность:")
            .and_then(|seg| {
                if seg.contains("низк") || seg.contains("легк") {
                    Some(Difficulty::Easy)
                } else if seg.contains("средн") {
                    Some(Difficulty::Medium)
                } else if seg.contains("высок") || seg.contains("сложн") {
                    Some(Difficulty::Hard)
                } else {
                    None
                }
            })
            .or_else(|| difficulty_from_keywords(&lower.replace("сложност", "")));

        let cooking_time = segment("время")
            .and_then(parse_duration)
            .or_else(|| {
                TIME.iter().find_map(|(pattern, multiplier)| {
                    let minutes: u32 = pattern.captures(&lower)?[1].parse().ok()?;
                    Some(minutes * multiplier)
                })
            });

        let servings = SERVINGS
            .captures(&lower)
            .and_then(|cap| cap[1].parse().ok());

        Self {
            difficulty,
            cooking_time,
            servings,
        }
    }

    /// Whether this recipe takes less than half an hour.
    pub fn is_quick(&self) -> bool {
        matches!(self.cooking_time, Some(minutes) if minutes < 30)
    }

    pub fn is_easy(&self) -> bool {
        self.difficulty == Some(Difficulty::Easy)
    }
}

fn difficulty_from_keywords(text: &str) -> Option<Difficulty> {
    let any = |words: &[&str]| words.iter().any(|word| text.contains(word));
    if any(&["просто", "легко", "быстро", "easy"]) {
        Some(Difficulty::Easy)
    } else if any(&["средней", "умеренно", "medium"]) {
        Some(Difficulty::Medium)
    } else if any(&["сложно", "трудно", "hard", "difficult"]) {
        Some(Difficulty::Hard)
    } else {
        None
    }
}

/// Aggregate statistics over a set of saved recipes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecipeStats {
    pub total: usize,
    /// Mean cooking time in minutes, over recipes that state one, rounded to one decimal place.
    pub average_cooking_time: f64,
    /// Number of recipes at each difficulty level.
    pub difficulty_levels: BTreeMap<String, usize>,
}

impl RecipeStats {
    pub fn calculate(recipes: &[Favorite]) -> Self {
        let metadata = recipes
            .iter()
            .map(|recipe| RecipeMetadata::extract(&recipe.recipe_text))
            .collect::<Vec<_>>();

        let times = metadata
            .iter()
            .filter_map(|meta| meta.cooking_time)
            .collect::<Vec<_>>();
        let average_cooking_time = if times.is_empty() {
            0.
        } else {
            let mean = times.iter().sum::<u32>() as f64 / times.len() as f64;
            (mean * 10.).round() / 10.
        };

        let mut difficulty_levels = BTreeMap::new();
        for meta in &metadata {
            let level = match meta.difficulty {
                Some(difficulty) => difficulty.to_string(),
                None => "не указано".into(),
            };
            *difficulty_levels.entry(level).or_default() += 1;
        }

        Self {
            total: recipes.len(),
            average_cooking_time,
            difficulty_levels,
        }
    }
}

/// Saved recipes matching `query` in their name, products or text, case-insensitively.
pub fn search<'a>(recipes: &'a [Favorite], query: &str) -> Vec<&'a Favorite> {
    let query = query.to_lowercase();
    recipes
        .iter()
        .filter(|recipe| {
            recipe.dish_name.to_lowercase().contains(&query)
                || recipe.products_snapshot.to_lowercase().contains(&query)
                || recipe.recipe_text.to_lowercase().contains(&query)
        })
        .collect()
}
