//! Text-to-image prompts for dish photos.

use super::DishImage;
use crate::text::{char_len, prefix};
use once_cell::sync::Lazy;
use regex::Regex;

const INGREDIENTS_FALLBACK: &str = "fresh ingredients, beautifully presented";
const ELEMENTS_FALLBACK: &str = "fresh ingredients, beautiful presentation";

const SECTION_START: [&str; 4] = ["ингредиент", "состав", "продукт", "ingredient"];
const SECTION_END: [&str; 5] = ["приготовлен", "инструкц", "шаг", "instruction", "steps"];

const GEMINI_QUALITY: [&str; 9] = [
    "High quality, restaurant presentation.",
    "Natural window lighting, soft shadows.",
    "Shallow depth of field, blurred background.",
    "Clean plate on rustic wooden table.",
    "Appetizing, vibrant colors, fresh look.",
    "No text, no watermark, no logos.",
    "No people, no hands, no utensils in frame.",
    "Square aspect ratio 1:1.",
    "1024x1024 resolution, sharp focus on food.",
];

const CUISINES: [(&str, &[&str]); 6] = [
    ("italian", &["pasta", "pizza", "risotto", "bruschetta", "tiramisu"]),
    ("asian", &["sushi", "ramen", "stir fry", "curry", "dumpling"]),
    ("french", &["ratatouille", "quiche", "crepe", "souffle", "croissant"]),
    ("mexican", &["taco", "burrito", "guacamole", "enchilada", "quesadilla"]),
    ("russian", &["борщ", "блины", "пельмени", "окрошка", "салат оливье"]),
    (
        "dessert",
        &["cake", "pie", "cookie", "ice cream", "chocolate", "десерт", "торт"],
    ),
];

const REPLICATE_STYLES: [(&str, &[&str]); 6] = [
    (
        "food photography, dessert styling, studio lighting",
        &["cake", "pie", "cookie", "dessert", "sweet", "chocolate", "торт", "десерт"],
    ),
    (
        "fresh, vibrant, natural light, healthy food",
        &["salad", "vegetable", "fresh", "зелень", "овощ", "салат"],
    ),
    (
        "restaurant quality, gourmet, dramatic lighting",
        &["meat", "steak", "chicken", "beef", "pork", "мясо", "куриц", "говядин"],
    ),
    (
        "comfort food, rustic, warm lighting",
        &["soup", "stew", "broth", "суп", "бульон", "похлебка"],
    ),
    (
        "Italian cuisine, rustic, wood-fired",
        &["pasta", "pizza", "italian", "итальянск", "паста", "пицца"],
    ),
    (
        "Japanese minimalism, clean presentation",
        &["sushi", "asian", "japanese", "chinese", "суши", "азиатск"],
    ),
];

static PHOTO_WORDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(professional|photography|photo|image|picture|of)\b").unwrap());
static PHOTO_WORDS_KEEP_OF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(professional|photography|photo|image|picture)\b").unwrap());

/// Lowercase a visual description and strip the words that describe the photo rather than the food.
fn simplify(visual: &str, words: &Regex) -> String {
    let lower = visual.to_lowercase();
    words
        .replace_all(&lower, "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

fn dedup(items: Vec<String>, max: usize) -> Vec<String> {
    let mut unique: Vec<String> = vec![];
    for item in items {
        if char_len(&item) > 2 && !unique.contains(&item) {
            unique.push(item);
        }
    }
    unique.truncate(max);
    unique
}

/// Up to five ingredients, from the visual description and the recipe's ingredient list.
pub fn ingredients(recipe: Option<&str>, visual: Option<&str>) -> String {
    let mut found = vec![];
    if let Some(visual) = visual {
        found.push(simplify(visual, &PHOTO_WORDS));
    }
    if let Some(recipe) = recipe {
        let mut in_section = false;
        for line in recipe.lines() {
            let lower = line.to_lowercase();
            if contains_any(&lower, &SECTION_START) {
                in_section = true;
                continue;
            }
            if !in_section {
                continue;
            }
            if contains_any(&lower, &SECTION_END) {
                break;
            }
            let line = line.trim();
            if char_len(line) <= 2 {
                continue;
            }
            let item = line.trim_start_matches(['-', '•', '*', ' ']).trim();
            if !item.is_empty() && char_len(item) < 100 {
                found.push(item.to_string());
                if found.len() >= 5 {
                    break;
                }
            }
        }
    }
    if found.is_empty() {
        return INGREDIENTS_FALLBACK.into();
    }
    dedup(found, 5).join(", ")
}

/// The cuisine and presentation level of a dish, like `italian restaurant quality`.
pub fn style(dish_name: &str, ingredients: &str) -> String {
    let dish = dish_name.to_lowercase();
    let ingredients = ingredients.to_lowercase();
    let cuisine = CUISINES
        .iter()
        .find(|(_, keywords)| {
            keywords
                .iter()
                .any(|keyword| dish.contains(keyword) || ingredients.contains(keyword))
        })
        .map_or("international", |(cuisine, _)| *cuisine);
    let presentation = if contains_any(
        &dish,
        &["simple", "basic", "easy", "quick", "простой", "быстрый"],
    ) {
        "home-style, rustic"
    } else if contains_any(&dish, &["gourmet", "fine dining", "luxury", "премиум"]) {
        "fine dining, gourmet"
    } else {
        "restaurant quality"
    };
    format!("{cuisine} {presentation}")
}

/// The Imagen prompt for a dish.
pub fn gemini_prompt(dish: &DishImage) -> String {
    let ingredients = ingredients(dish.recipe_text.as_deref(), dish.visual.as_deref());
    let style = style(&dish.dish_name, &ingredients);

    let mut parts = vec![format!(
        "Professional food photography of {}.",
        dish.dish_name
    )];
    if !ingredients.is_empty() {
        parts.push(format!("Ingredients: {ingredients}."));
    }
    parts.push(format!("Style: {style}."));
    parts.extend(GEMINI_QUALITY.iter().map(|line| line.to_string()));

    let prompt = parts.join(" ");
    if char_len(&prompt) > 1000 {
        format!("{}...", prefix(&prompt, 1000))
    } else {
        prompt
    }
}

/// Up to three short visual elements for a Replicate prompt.
pub fn key_elements(recipe: Option<&str>, visual: Option<&str>) -> String {
    let mut elements = vec![];
    if let Some(visual) = visual {
        elements.push(simplify(visual, &PHOTO_WORDS_KEEP_OF));
    }
    if let Some(recipe) = recipe {
        for line in recipe.lines().take(10) {
            let line = line.trim();
            if !line.contains(['-', '•', '*', '–']) || char_len(line) <= 5 {
                continue;
            }
            let item = line.trim_start_matches(['-', '•', '*', '–', ' ']).trim();
            let words = item.split_whitespace().count();
            if words > 0 && words <= 5 {
                elements.push(item.to_string());
                if elements.len() >= 3 {
                    break;
                }
            }
        }
    }
    if elements.is_empty() {
        return ELEMENTS_FALLBACK.into();
    }
    dedup(elements, 3).join(", ")
}

pub fn replicate_style(dish_name: &str, elements: &str) -> &'static str {
    let dish = dish_name.to_lowercase();
    let elements = elements.to_lowercase();
    REPLICATE_STYLES
        .iter()
        .find(|(_, keywords)| {
            keywords
                .iter()
                .any(|keyword| dish.contains(keyword) || elements.contains(keyword))
        })
        .map_or("restaurant quality, professional food styling", |(style, _)| *style)
}

/// The Replicate prompt for a dish, at most 500 characters.
pub fn replicate_prompt(dish: &DishImage) -> String {
    const MAX: usize = 500;

    let elements = key_elements(dish.recipe_text.as_deref(), dish.visual.as_deref());
    let style = replicate_style(&dish.dish_name, &elements);
    let head = format!("Professional food photography of {}", dish.dish_name);

    let mut parts = vec![head.as_str()];
    if !elements.is_empty() {
        parts.push(&elements);
    }
    parts.extend([
        style,
        "highly detailed, sharp focus",
        "appetizing, delicious looking",
        "natural window lighting, soft shadows",
        "shallow depth of field, blurred background",
        "clean plate, food styling",
        "square aspect ratio 1:1",
        "1024x1024 resolution",
    ]);
    let prompt = parts.join(", ");
    if char_len(&prompt) <= MAX {
        return prompt;
    }

    let mut important = vec![head.as_str()];
    if !elements.is_empty() {
        important.push(prefix(&elements, 100));
    }
    important.extend([style, "appetizing, delicious looking"]);
    prefix(&important.join(", "), MAX).trim().to_string()
}

#[cfg(test)]
mod test {
    use super::*;

    const RECIPE: &str = "🍲 Борщ\n\n📦 Ингредиенты:\n- свекла 2 шт\n- капуста 300 г\n• морковь\n- лук\n\n👨‍🍳 Приготовление:\n1. Нарезать овощи";

    #[test]
    fn test_ingredients_from_recipe() {
        assert_eq!(
            ingredients(Some(RECIPE), None),
            "свекла 2 шт, капуста 300 г, морковь, лук"
        );
    }

    #[test]
    fn test_ingredients_from_visual() {
        assert_eq!(
            ingredients(None, Some("Professional photo of creamy Pasta with basil")),
            "creamy pasta with basil"
        );
        assert_eq!(ingredients(None, None), INGREDIENTS_FALLBACK);
    }

    #[test]
    fn test_ingredients_limit() {
        let recipe = "Ингредиенты:\n- a1a\n- b2b\n- c3c\n- d4d\n- e5e\n- f6f\n- g7g";
        assert_eq!(ingredients(Some(recipe), None), "a1a, b2b, c3c, d4d, e5e");
    }

    #[test]
    fn test_style() {
        assert_eq!(style("Spaghetti pasta", ""), "italian restaurant quality");
        assert_eq!(style("Борщ", ""), "russian restaurant quality");
        assert_eq!(style("Quick omelette", "eggs"), "international home-style, rustic");
        assert_eq!(style("Gourmet steak", "chocolate sauce"), "dessert fine dining, gourmet");
    }

    #[test]
    fn test_gemini_prompt() {
        let prompt = gemini_prompt(&DishImage::new("Борщ").with_recipe(RECIPE));
        assert!(prompt.starts_with(
            "Professional food photography of Борщ. Ingredients: свекла 2 шт, капуста 300 г, морковь, лук. Style: russian restaurant quality."
        ));
        assert!(prompt.ends_with("1024x1024 resolution, sharp focus on food."));

        let long = DishImage::new("x".repeat(1200));
        let prompt = gemini_prompt(&long);
        assert_eq!(char_len(&prompt), 1003);
        assert!(prompt.ends_with("..."));
    }

    #[test]
    fn test_key_elements() {
        assert_eq!(
            key_elements(Some(RECIPE), None),
            "свекла 2 шт, капуста 300 г, морковь"
        );
        assert_eq!(
            key_elements(None, Some("Photo of a rich soup")),
            "of a rich soup"
        );
        assert_eq!(key_elements(None, None), ELEMENTS_FALLBACK);
    }

    #[test]
    fn test_replicate_style() {
        assert_eq!(
            replicate_style("Chocolate cake", ""),
            "food photography, dessert styling, studio lighting"
        );
        assert_eq!(
            replicate_style("Куриные котлеты", "куриц"),
            "restaurant quality, gourmet, dramatic lighting"
        );
        assert_eq!(
            replicate_style("Омлет", "яйца"),
            "restaurant quality, professional food styling"
        );
    }

    #[test]
    fn test_replicate_prompt() {
        let prompt = replicate_prompt(&DishImage::new("Омлет").with_visual("fluffy omelette"));
        assert_eq!(
            prompt,
            "Professional food photography of Омлет, fluffy omelette, \
             restaurant quality, professional food styling, highly detailed, sharp focus, \
             appetizing, delicious looking, natural window lighting, soft shadows, \
             shallow depth of field, blurred background, clean plate, food styling, \
             square aspect ratio 1:1, 1024x1024 resolution"
        );

        let long = replicate_prompt(&DishImage::new("Омлет").with_visual("y ".repeat(300)));
        assert!(char_len(&long) <= 500);
        assert!(long.ends_with("appetizing, delicious looking"));
    }
}
