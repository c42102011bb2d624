//! Culinary reasoning on top of a [`ChatModel`].
//!
//! The chef never fails: model errors are logged and treated as empty replies, and every operation
//! has a fallback for replies it cannot use.

use crate::llm::{ChatModel, Prompt, Task};
use crate::recipe::{Category, Dish};
use crate::text::sanitize_prompt;
use serde::Deserialize;

/// Appended to every successfully generated recipe.
pub const BON_APPETIT: &str = "\n\n👨‍🍳 <b>Приятного аппетита!</b>";

const FLAVOR_RULES: &str = "❗️ ПРАВИЛА СОЧЕТАЕМОСТИ:
🎭 КОНТРАСТЫ: Жирное + Кислое, Сладкое + Солёное, Мягкое + Хрустящее.
✨ УСИЛЕНИЕ: Помидор + Базилик, Рыба + Укроп + Лимон, Тыква + Корица, Картофель + Лук + Укроп
👑 ОДИН ГЛАВНЫЙ ИНГРЕДИЕНТ: В каждом блюде один \"король\".
❌ ТАБУ: Рыба + Молочные продукты (в горячем), два сильных мяса в одной композиции.
";

const PANTRY_NOTE: &str = "⚠️ ВАЖНО: соль, сахар, вода, масло и специи ДОСТУПНЫ ВСЕГДА.";

const CHEF_TIP: &str = "💡 СОВЕТ ШЕФ-ПОВАРА: Напиши СТРОГО на русском языке. Проанализируй блюдо через триаду: ВКУС, АРОМАТ, ТЕКСТУРА.
Порекомендуй ровно один ингредиент, которого нет в списке, для улучшения этой триады.";

/// The smallest number of products for which a full lunch is offered.
const MIX_THRESHOLD: usize = 8;

/// A chef backed by a chat model.
#[derive(Debug)]
pub struct Chef<M> {
    model: M,
}

impl<M: ChatModel> Chef<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Ask the model, treating failures as an empty reply.
    async fn ask(&self, prompt: Prompt) -> String {
        match self.model.complete(&prompt).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::error!(task = ?prompt.task, "chat model error: {err:#}");
                String::new()
            }
        }
    }

    /// Check whether `text` is a plausible list of food products.
    pub async fn validate_ingredients(&self, text: &str) -> bool {
        #[derive(Deserialize)]
        struct Verdict {
            #[serde(default)]
            valid: bool,
        }

        let system = "Ты эксперт по безопасности продуктов. Проверь текст на валидность.
📋 КРИТЕРИИ: ✅ ПРИНЯТЬ (еда, специи, опечатки), ❌ ОТКЛОНИТЬ (яд, мат, бред, приветствия, <3 симв).
🎯 СТРОГИЙ JSON: {\"valid\": true, \"reason\": \"кратко\"}";
        let user = format!("Текст: \"{}\"", sanitize_prompt(text, 200));
        let reply = self.ask(Prompt::new(Task::Validation, system, user)).await;

        match serde_json::from_str::<Verdict>(&extract_json(&reply)) {
            Ok(verdict) => verdict.valid,
            Err(_) => reply.to_lowercase().contains("true"),
        }
    }

    /// Pick up to four dish categories that suit `products`.
    ///
    /// The result holds category keys as returned by the model; they are not guaranteed to be
    /// known [`Category`] keys.
    pub async fn analyze_categories(&self, products: &str) -> Vec<String> {
        let products = sanitize_prompt(products, 300);
        let count = count_items(&products);
        let mix_available = count >= MIX_THRESHOLD;
        let mix = Category::Mix.to_string();

        let system = format!(
            "Ты шеф-повар. Определи категории блюд.
🛒 ПРОДУКТЫ: {products}
📦 БАЗА (ВСЕГДА В НАЛИЧИИ): соль, сахар, вода, подсолнечное масло, специи.
📊 Кол-во продуктов: {count}

📚 КАТЕГОРИИ:
- \"mix\" (ПОЛНЫЙ ОБЕД) — ОБЯЗАТЕЛЬНО ПЕРВЫМ, если продуктов >= {MIX_THRESHOLD}.
- \"soup\", \"main\", \"salad\", \"breakfast\", \"dessert\", \"drink\", \"snack\".

🎯 ТРЕБОВАНИЯ:
1. Если продуктов >= {MIX_THRESHOLD}, верни \"mix\" и еще 3 подходящие категории.
2. Если продуктов < {MIX_THRESHOLD}, верни от 2 до 4 категорий.
🎯 JSON: [\"mix\", \"cat2\", \"cat3\", \"cat4\"]"
        );
        let prompt =
            Prompt::new(Task::Categorization, system, "Определи категории").with_temperature(0.1);
        let reply = self.ask(prompt).await;

        match serde_json::from_str::<Vec<String>>(&extract_json(&reply)) {
            Ok(mut categories) => {
                if mix_available && !categories.contains(&mix) {
                    categories.insert(0, mix);
                } else if !mix_available {
                    categories.retain(|category| *category != mix);
                }
                categories.truncate(4);
                categories
            }
            Err(_) => {
                let fallback: &[Category] = if mix_available {
                    &[Category::Mix, Category::Main, Category::Soup, Category::Salad]
                } else {
                    &[Category::Main, Category::Soup]
                };
                fallback.iter().map(|category| category.to_string()).collect()
            }
        }
    }

    /// Suggest dishes of `category` that can be cooked from `products`.
    pub async fn generate_dishes(&self, products: &str, category: &str) -> Vec<Dish> {
        let products = sanitize_prompt(products, 400);
        let system = if category == Category::Mix.to_string() {
            format!(
                "📝 ЗАДАНИЕ: Составь ОДИН комплексный обед из 4-х блюд.
🛒 ПРОДУКТЫ: {products}
📦 БАЗА: соль, сахар, вода, масло, специи.
{PANTRY_NOTE}

🎯 ТРЕБОВАНИЯ К ФОРМАТУ ПОЛЕЙ:
- Поле \"name\": СТРОГО одно из названий: \"Суп\", \"Второе блюдо\", \"Салат\" или \"Напиток\" (на языке ввода, если это не русский, но сохрани структуру).
- Поле \"desc\": Краткое аппетитное описание блюда на РУССКОМ языке.

🎯 ТРЕБОВАНИЯ К МЕНЮ:
- СТРОГО 4 блюда в списке.
- Распредели продукты логично: основной белок в суп и второе, овощи в салат, ягоды/фрукты в напиток.
🎯 JSON: [
  {{ \"name\": \"Суп\", \"desc\": \"Описание...\" }},
  {{ \"name\": \"Второе блюдо\", \"desc\": \"Описание...\" }},
  {{ \"name\": \"Салат\", \"desc\": \"Описание...\" }},
  {{ \"name\": \"Напиток\", \"desc\": \"Описание...\" }}
]"
            )
        } else {
            format!(
                "📝 ЗАДАНИЕ: Составь меню \"{category}\".
🛒 ПРОДУКТЫ: {products}
{PANTRY_NOTE}
🎯 ТРЕБОВАНИЯ К ЯЗЫКУ:
- Поле \"name\": Название блюда на языке ввода.
- Поле \"desc\": Описание на РУССКОМ языке.
🎯 JSON: [{{ \"name\": \"...\", \"desc\": \"...\" }}]"
            )
        };
        let reply = self
            .ask(Prompt::new(Task::Generation, system, "Генерируй меню"))
            .await;

        serde_json::from_str(&extract_json(&reply)).unwrap_or_else(|err| {
            tracing::warn!(category, "unusable dish list: {err}");
            vec![]
        })
    }

    /// Write a recipe for `dish`, using only `products` and basic pantry items.
    ///
    /// The result is empty if the model could not be reached.
    pub async fn generate_recipe(&self, dish: &str, products: &str) -> String {
        let dish = sanitize_prompt(dish, 150);
        let products = sanitize_prompt(products, 600);
        let is_mix = dish.to_lowercase().contains("полный обед") || dish.contains('+');

        let instruction = if is_mix {
            "🍱 ПОЛНЫЙ ОБЕД ИЗ 4 БЛЮД. Раздели на блоки: [СУП], [ВТОРОЕ], [САЛАТ], [НАПИТОК]."
        } else {
            "Напиши рецепт одного блюда."
        };
        let translation_rule = if has_cyrillic(&products) {
            "Пиши названия ингредиентов СТРОГО на русском языке без скобок и повторений."
        } else {
            "Заголовок и ингредиенты: на языке оригинала. В скобках рядом напиши перевод на РУССКИЙ (напр. 'Pollo (курица)')."
        };

        let system = format!(
            "Ты профессиональный шеф. Напиши рецепт: \"{dish}\".

🛒 ДОСТУПНЫЕ ПРОДУКТЫ: {products}
⚠️ БАЗА (ДОСТУПНА ВСЕГДА): соль, сахар, вода, подсолнечное масло, специи.

🎯 КУЛИНАРНАЯ ЛОГИКА:
1. **Лаконичность:** Используй только те ингредиенты из списка, которые действительно подходят этому блюду. НЕ ПЫТАЙСЯ использовать все продукты сразу, если это испортит вкус.
2. **Чистота состава:** В списке \"Ингредиенты\" и в шагах приготовления указывай ТОЛЬКО те продукты, которые ты выбрал для этого рецепта. Не упоминай оставшиеся продукты.
3. **Запрет на выдумку:** Не добавляй продукты, которых нет в списке (кроме БАЗЫ).

🎯 ТРЕБОВАНИЯ К ЯЗЫКУ:
1. {translation_rule}
2. Шаги приготовления и Совет: Пиши СТРОГО на РУССКОМ языке.

{instruction}
{FLAVOR_RULES}

📋 СТРОГИЙ ФОРМАТ:
{dish}

📦 Ингредиенты:
- [Название] — [количество]

📊 Пищевая ценность на 1 порцию:
🥚 Белки: X г | 🥑 Жиры: X г | 🌾 Углеводы: X г | ⚡ Энерг. ценность: X ккал

⏱ Время: X минут | 🪦 Сложность: [низкая/средняя/высокая] | 👥 Порции: X человека

👨‍🍳 Приготовление:
1. [шаг на русском]

{CHEF_TIP}
"
        );
        let reply = self
            .ask(Prompt::new(Task::Recipe, system, "Напиши рецепт"))
            .await;
        finish_recipe(reply)
    }

    /// Write a recipe for `dish` without any constraint on ingredients.
    pub async fn generate_freestyle_recipe(&self, dish: &str) -> String {
        let dish = sanitize_prompt(dish, 100);
        let translation_rule = if has_cyrillic(&dish) {
            "Пиши названия ингредиентов СТРОГО на русском языке без скобок и повторений."
        } else {
            "Название и ингредиенты — на языке оригинала, перевод на русский в скобках."
        };

        let system = format!(
            "Ты креативный шеф-повар. Рецепт: \"{dish}\"

🎯 КУЛИНАРНАЯ ПРАКТИКА:
- Составляй рецепт логично и профессионально.
- В списке ингредиентов указывай только то, что реально используется в шагах приготовления.

🎯 ТРЕБОВАНИЯ К ЯЗЫКУ:
1. {translation_rule}
2. Шаги приготовления и Совет: Пиши СТРОГО на РУССКОМ языке.

📋 СТРОГИЙ ФОРМАТ (СОБЛЮДАЙ ЭМОДЗИ):
{dish}

📦 Ингредиенты: ...

📊 Пищевая ценность на 1 порцию: 🥚 Белки: X г | 🥑 Жиры: X г | 🌾 Углеводы: X г | ⚡ Энерг. ценность: X ккал
⏱ Время: X минут | 🪦 Сложность: ... | 👥 Порции: ...

👨‍🍳 Приготовление: ...

{CHEF_TIP}"
        );
        let reply = self
            .ask(Prompt::new(Task::Freestyle, system, "Создай рецепт"))
            .await;
        finish_recipe(reply)
    }

    /// Transcribe a voice message, or return an empty string if that fails.
    pub async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> String {
        match self.model.transcribe(audio, file_name).await {
            Ok(text) => text,
            Err(err) => {
                tracing::error!("speech recognition failed: {err:#}");
                String::new()
            }
        }
    }
}

/// Sign off a recipe. Empty replies and refusals are returned unchanged.
fn finish_recipe(reply: String) -> String {
    if reply.trim().is_empty() || is_refusal(&reply) {
        reply
    } else {
        reply + BON_APPETIT
    }
}

/// Count the products in a sanitized product list.
fn count_items(products: &str) -> usize {
    if products.contains([',', ';', '\n']) {
        products
            .split([',', ';', '\n', '.'])
            .filter(|item| item.trim().chars().count() > 1)
            .count()
    } else {
        products
            .split_whitespace()
            .filter(|item| item.chars().count() > 1)
            .count()
    }
}

fn has_cyrillic(text: &str) -> bool {
    text.chars()
        .any(|c| matches!(c, 'а'..='я' | 'А'..='Я'))
}

/// Cut the JSON document out of a model reply.
///
/// Models like to wrap JSON in Markdown fences or surround it with commentary, so this returns the
/// text from the first `{` or `[` to the last `}` or `]`.
pub fn extract_json(text: &str) -> String {
    let text = text.replace("```json", "").replace("```", "");
    let start = text.find(['{', '[']);
    let end = text.rfind(['}', ']']);
    match (start, end) {
        (Some(start), Some(end)) if end > start => text[start..=end].into(),
        _ => text.trim().into(),
    }
}

/// Whether the model declined to answer.
pub fn is_refusal(text: &str) -> bool {
    const REFUSALS: [&str; 4] = [
        "cannot fulfill",
        "against my policy",
        "не могу выполнить",
        "⛔",
    ];
    let text = text.to_lowercase();
    REFUSALS.iter().any(|phrase| text.contains(phrase))
}
