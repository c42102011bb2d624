//! Texts sent to users. Everything here is HTML for the Bot API.

use crate::images::ImageStats;
use crate::recipe::{Category, Dish, RecipeStats};
use crate::store::{Favorite, PromoActivation, Stats, UserSummary};
use crate::text::{char_len, escape_html, format_duration, format_time_ago, prefix};
use chrono::{DateTime, Utc};
use std::fmt::Write;

pub const WELCOME: &str = "👋 <b>Здравствуйте!</b>

Я — ваш персональный шеф-повар с искусственным интеллектом.

🍏 <b>Как это работает:</b>
1. Напишите или продиктуйте мне список продуктов
2. Я подберу подходящие блюда и категории
3. Выберите блюдо и получите подробный рецепт
4. Я могу сгенерировать фото блюда!

🌍 <b>Поддерживаю:</b> русский и английский языки
🎤 <b>Голосовые сообщения:</b> говорите продукты, я распознаю
📸 <b>Генерация фото:</b> кнопка '🎨 Сгенерировать фото'

🍽 <b>Начнем? Просто напишите или продиктуйте продукты!</b>";

pub const AUTHOR: &str = "👨‍💻 <b>Автор бота:</b> @inikonoff

💡 <b>Идеи и предложения:</b> @inikonoff
🐛 <b>Сообщить об ошибке:</b> @inikonoff

🌟 <b>Бот с открытым исходным кодом</b>
GitHub: https://github.com/inikonoff/chef-ai-bot";

pub const GREETING_HINT: &str = "👋 <b>Привет!</b>

Напишите или продиктуйте список продуктов, и я подберу блюда.
А если знаете, что хотите приготовить, попросите: <i>Дай рецепт паста карбонара</i>";

pub const LISTENING: &str = "🎧 <i>Слушаю...</i>";
pub const VOICE_NOT_RECOGNIZED: &str =
    "😕 <b>Не удалось распознать речь.</b>\nПопробуйте говорить четче или напишите текстом.";
pub const VOICE_FAILED: &str =
    "❌ <b>Ошибка обработки голосового сообщения.</b>\nПопробуйте написать текстом.";

pub const DISH_NAME_MISSING: &str =
    "📝 <b>Укажите название блюда.</b>\nПример: <i>Дай рецепт паста карбонара</i>";
pub const FREESTYLE_FAILED: &str = "❌ <b>Не удалось сгенерировать рецепт.</b>\nПопробуйте еще раз или измените название блюда.";
pub const RECIPE_FAILED: &str =
    "❌ <b>Не удалось сгенерировать рецепт.</b>\nПопробуйте выбрать другое блюдо.";

pub const YOU_ARE_WELCOME: &str = "🥰 <b>На здоровье! Приятного аппетита!</b> 👨‍🍳";

pub const NO_PRODUCTS: &str =
    "🛒 <b>Список продуктов пуст.</b>\nНачните заново с команды /start";
pub const ANALYZING: &str = "👨‍🍳 <i>Анализирую продукты и подбираю категории...</i>";
pub const NO_CATEGORIES: &str = "🤔 <b>Не удалось определить подходящие категории.</b>

Возможно, в списке продуктов есть опечатки или неясные названия.
Попробуйте уточнить список продуктов.";
pub const CHOOSE_CATEGORY_AGAIN: &str = "📂 <b>Выберите категорию:</b>";

pub const SESSION_RESET: &str = "🔄 <b>Сессия сброшена.</b>\nЖду список продуктов! 🍏";
pub const ADD_MORE: &str = "➕ <b>Напишите или продиктуйте, что добавить:</b>";

pub const IMAGE_STARTED: &str = "🎨 Начинаю генерацию изображения... (это займет 15-30 секунд)";
pub const IMAGE_UNAVAILABLE: &str = "😔 Генерация изображений сейчас недоступна.";
pub const IMAGE_FAILED: &str = "😔 <b>Не удалось сгенерировать изображение.</b>

Возможные причины:
• Ограничение дневного лимита генерации
• Слишком сложное описание блюда
• Технические проблемы с сервисами генерации

Попробуйте еще раз позже или выберите другое блюдо.";
pub const IMAGE_SEND_FAILED: &str = "❌ <b>Ошибка при генерации изображения.</b>\nПопробуйте еще раз или выберите другое блюдо.";

pub const NO_RECIPE_FOR_IMAGE: &str = "❌ Нет данных о рецепте. Сначала получите рецепт.";
pub const NO_RECIPE: &str = "❌ Нет данных о рецепте.";
pub const ALREADY_SAVED: &str = "⚠️ Этот рецепт уже сохранен!";
pub const SAVED: &str = "✅ Рецепт сохранен в избранное!";
pub const SAVE_FAILED: &str = "❌ Ошибка сохранения рецепта";
pub const FAVORITE_NOT_FOUND: &str = "❌ Рецепт не найден.";
pub const DELETED: &str = "✅ Рецепт удален из избранного";
pub const DELETE_FAILED: &str = "❌ Ошибка удаления рецепта";

pub const NO_FAVORITES: &str = "📂 <b>Сохраненные рецепты отсутствуют.</b>

Чтобы сохранить рецепт:
1. Сгенерируйте рецепт блюда
2. Нажмите кнопку '❤️ Сохранить рецепт'
3. Рецепт появится здесь!";
pub const FAVORITES_EMPTY_HEADER: &str = "📂 <b>Сохраненные рецепты отсутствуют.</b>";

pub const ENTER_PRODUCTS_FIRST: &str = "❌ Сначала введите продукты.";
pub const DISH_NOT_FOUND: &str = "❌ Блюдо не найдено.";
pub const UNKNOWN_COMMAND: &str = "❌ Неизвестная команда";
pub const CALLBACK_FAILED: &str = "❌ Произошла ошибка. Попробуйте еще раз.";
pub const MESSAGE_FAILED: &str = "❌ <b>Произошла ошибка.</b>\nПопробуйте еще раз.";

pub const PROMO_MISSING: &str =
    "🎟 <b>Укажите промокод.</b>\nПример: <code>/promo CHEF2024</code>";

pub fn invalid_input(reason: impl std::fmt::Display) -> String {
    format!("⚠️ <b>{}</b>", escape_html(&reason.to_string()))
}

pub fn not_products(text: &str) -> String {
    format!(
        "🤨 <b>\"{}\"</b> — не похоже на список продуктов.

📝 <b>Пример правильного ввода:</b>
<i>курица, помидоры, лук, сыр, сметана</i>
или
<i>яйца молоко мука сахар</i>",
        escape_html(prefix(text, 100))
    )
}

pub fn accepted(products: &str) -> String {
    format!("✅ <b>Принято:</b> {}", escape_html(products))
}

pub fn added(text: &str, products: &str) -> String {
    let more = if char_len(products) > 200 { "..." } else { "" };
    format!(
        "➕ <b>Добавлено:</b> {}\n🛒 <b>Всего продуктов:</b> {}{more}",
        escape_html(text),
        escape_html(prefix(products, 200)),
    )
}

pub fn too_many_products(current: &str, max: usize) -> String {
    format!(
        "⚠️ <b>Слишком много продуктов!</b>
Текущий список: {} символов
Максимум: {max} символов

Рекомендуется начать новый список командой /start",
        char_len(current)
    )
}

pub fn choose_category(products: &str) -> String {
    let more = if char_len(products) > 100 { "..." } else { "" };
    format!(
        "📂 <b>Выберите категорию блюд:</b>\n\n<i>На основе ваших продуктов: {}{more}</i>",
        escape_html(prefix(products, 100))
    )
}

pub fn category_selected(category: &str) -> String {
    format!("Выбрано: {}", Category::label_for(category))
}

pub fn picking_dishes(category: &str) -> String {
    format!(
        "🍳 <i>Подбираю {}...</i>",
        Category::label_for(category).to_lowercase()
    )
}

pub fn no_dishes(category: &str) -> String {
    format!(
        "😔 <b>Не удалось придумать {} из ваших продуктов.</b>\n\nПопробуйте другую категорию или дополните список продуктов.",
        Category::label_for(category).to_lowercase()
    )
}

pub fn menu(category: &str, dishes: &[Dish]) -> String {
    let mut text = format!("🍽 <b>Меню: {}</b>\n\n", Category::label_for(category));
    for (i, dish) in dishes.iter().enumerate() {
        let _ = write!(
            text,
            "{}. <b>{}</b>\n<i>{}</i>\n\n",
            i + 1,
            escape_html(&dish.name),
            escape_html(&dish.desc)
        );
    }
    text.push_str("👇 <b>Выберите блюдо для получения рецепта:</b>");
    text
}

pub fn dish_selected(dish: &str) -> String {
    format!("Выбрано: {}...", prefix(dish, 30))
}

pub fn writing_recipe(dish: &str) -> String {
    format!("👨‍🍳 <i>Пишу рецепт: <b>{}</b>...</i>", escape_html(dish))
}

pub fn searching_recipe(dish: &str) -> String {
    format!("⚡️ <i>Ищу рецепт: <b>{}</b>...</i>", escape_html(dish))
}

pub fn generating_image(dish: &str) -> String {
    format!(
        "🎨 <i>Генерирую изображение для: <b>{}</b>...</i>\n\n<i>Используется AI: Gemini + Replicate</i>\n<i>Время ожидания: 15-30 секунд</i>",
        escape_html(dish)
    )
}

pub fn image_caption(dish: &str) -> String {
    format!(
        "📸 <b>{}</b>\n\n<i>Сгенерировано искусственным интеллектом</i>",
        escape_html(dish)
    )
}

pub fn favorite_header(dish: &str) -> String {
    format!("📂 <b>{}</b>\n\n", escape_html(dish))
}

/// The numbered list of saved recipes, with a note when only the first `favorites.len()` of
/// `total` are shown.
pub fn favorites(header: &str, favorites: &[Favorite], total: usize) -> String {
    let mut text = format!("{header}\n\n");
    for (i, favorite) in favorites.iter().enumerate() {
        let _ = writeln!(
            text,
            "{}. <b>{}</b> ({})",
            i + 1,
            escape_html(&favorite.dish_name),
            favorite.created_at.format("%d.%m.%Y")
        );
    }
    if total > favorites.len() {
        let _ = write!(
            text,
            "\n📝 <i>Показано {} из {total} рецептов</i>",
            favorites.len()
        );
    }
    text
}

pub const FAVORITES_HEADER: &str = "📂 <b>Ваши сохраненные рецепты:</b>";

pub fn search_header(query: &str) -> String {
    format!("🔍 <b>Рецепты по запросу «{}»:</b>", escape_html(query))
}

pub fn nothing_found(query: &str) -> String {
    format!(
        "🔍 <b>Ничего не найдено по запросу «{}».</b>\n\nПосмотреть все рецепты: /my_recipes",
        escape_html(query)
    )
}

pub fn personal_stats(stats: &RecipeStats) -> String {
    if stats.total == 0 {
        return "📊 <b>Ваша статистика</b>\n\nУ вас пока нет сохраненных рецептов.".into();
    }
    let mut text = format!(
        "📊 <b>Ваша статистика</b>\n\n📂 Сохранено рецептов: {}\n",
        stats.total
    );
    if stats.average_cooking_time > 0. {
        let _ = writeln!(
            text,
            "⏱ Среднее время приготовления: {}",
            format_duration(stats.average_cooking_time.round() as u32)
        );
    }
    text.push_str("\n📈 <b>Сложность:</b>\n");
    for (level, count) in &stats.difficulty_levels {
        let _ = writeln!(text, "• {level}: {count}");
    }
    text
}

fn format_date(date: DateTime<Utc>) -> String {
    date.format("%d.%m.%Y %H:%M").to_string()
}

pub fn system_stats(users: &Stats, images: &ImageStats) -> String {
    let mut text = String::from("📊 <b>СТАТИСТИКА СИСТЕМЫ</b>\n\n");
    let _ = write!(
        text,
        "👥 <b>Пользователи:</b>
• Всего: {}
• Премиум: {}
• Новые (7д): {}
• Рецептов сохранено: {}

",
        users.total_users, users.premium_users, users.new_users_7d, users.total_recipes
    );
    let _ = write!(
        text,
        "🖼 <b>Генерация изображений:</b>
• Всего запросов: {}
• Попаданий в кэш: {}
• Эффективность кэша: {:.1}%
• Gemini использовано сегодня: {}/{}

",
        images.total_requests,
        images.cache_hits,
        images.cache_hit_rate,
        images.gemini.daily_used,
        images.gemini.daily_limit
    );
    let _ = write!(
        text,
        "⚙️ <b>Настройки:</b>\n• Приоритет: {}\n• Fallback Replicate: {}\n",
        images.provider_priority,
        if images.replicate_fallback { "✅" } else { "❌" }
    );

    let cache = &images.cache;
    if cache.enabled {
        let _ = write!(
            text,
            "\n💾 <b>Кэш изображений:</b>\n• Файлов: {}\n• Размер: {:.1}MB / {}MB\n",
            cache.file_count, cache.total_size_mb, cache.max_size_mb
        );
        if let Some(last_cleanup) = cache.last_cleanup {
            let _ = writeln!(text, "• Последняя очистка: {}", format_date(last_cleanup));
        }
    }
    text
}

pub fn stats_failed(err: impl std::fmt::Display) -> String {
    format!(
        "❌ Ошибка получения статистики: {}",
        escape_html(&err.to_string())
    )
}

pub fn admin_panel(users: &[UserSummary], now: DateTime<Utc>) -> String {
    let mut text = String::from("🛠 <b>Панель администратора</b>\n\n👥 <b>Последние пользователи:</b>\n");
    if users.is_empty() {
        text.push_str("<i>пока никого</i>\n");
    }
    for user in users {
        let _ = write!(text, "• <code>{}</code>", user.user_id);
        if let Some(username) = &user.username {
            let _ = write!(text, " @{}", escape_html(username));
        }
        if user.is_premium {
            text.push_str(" ⭐");
        }
        let _ = writeln!(text, " — {}", format_time_ago(user.created_at, now));
    }
    text.push_str(
        "\n🎟 <b>Промокоды:</b>
Создание: <code>chef-admin create-promo CODE --days 7 --limit 1</code>
Активация пользователем: <code>/promo CODE</code>

📊 Статистика: /stats",
    );
    text
}

pub fn promo(activation: &PromoActivation) -> String {
    match activation {
        PromoActivation::NotFound => "❌ <b>Промокод не найден.</b>".into(),
        PromoActivation::LimitReached => {
            "⚠️ <b>Промокод уже использован максимальное количество раз.</b>".into()
        }
        PromoActivation::AlreadyUsed => "⚠️ <b>Вы уже активировали этот промокод.</b>".into(),
        PromoActivation::Activated { days, expires_at } => format!(
            "🎉 <b>Промокод активирован!</b>\nПремиум на {days} дн., до {}.",
            expires_at.format("%d.%m.%Y")
        ),
    }
}
