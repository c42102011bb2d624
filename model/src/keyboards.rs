//! Inline keyboards and the callback data their buttons carry.

use crate::recipe::{Category, Dish};
use crate::store::Favorite;
use crate::telegram::{InlineKeyboardButton as Button, InlineKeyboardMarkup};
use crate::text::{ellipsize, prefix};
use derive_more::Display;
use std::str::FromStr;

/// The action requested by pressing an inline button.
#[derive(Clone, Debug, Display, PartialEq, Eq)]
pub enum Callback {
    #[display(fmt = "delete_msg")]
    DeleteMessage,
    #[display(fmt = "restart")]
    Restart,
    #[display(fmt = "action_add_more")]
    AddMore,
    #[display(fmt = "action_cook")]
    Cook,
    #[display(fmt = "cat_{}", _0)]
    Category(String),
    #[display(fmt = "back_to_categories")]
    BackToCategories,
    #[display(fmt = "dish_{}", _0)]
    Dish(usize),
    #[display(fmt = "gen_photo")]
    GeneratePhoto,
    #[display(fmt = "save_recipe")]
    SaveRecipe,
    #[display(fmt = "my_recipes_list")]
    FavoritesList,
    #[display(fmt = "fav_{}", _0)]
    ShowFavorite(String),
    #[display(fmt = "delete_fav_{}", _0)]
    DeleteFavorite(String),
}

/// Callback data this bot never sends.
#[derive(Clone, Debug, Display, PartialEq, Eq)]
#[display(fmt = "unknown callback data {:?}", _0)]
pub struct UnknownCallback(String);

impl std::error::Error for UnknownCallback {}

impl FromStr for Callback {
    type Err = UnknownCallback;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownCallback(data.into());
        Ok(match data {
            "delete_msg" => Self::DeleteMessage,
            "restart" => Self::Restart,
            "action_add_more" => Self::AddMore,
            "action_cook" => Self::Cook,
            "back_to_categories" => Self::BackToCategories,
            "gen_photo" => Self::GeneratePhoto,
            "save_recipe" => Self::SaveRecipe,
            "my_recipes_list" => Self::FavoritesList,
            _ => {
                if let Some(key) = data.strip_prefix("cat_") {
                    Self::Category(key.into())
                } else if let Some(index) = data.strip_prefix("dish_") {
                    Self::Dish(index.parse().map_err(|_| unknown())?)
                } else if let Some(id) = data.strip_prefix("delete_fav_") {
                    Self::DeleteFavorite(id.into())
                } else if let Some(id) = data.strip_prefix("fav_") {
                    Self::ShowFavorite(id.into())
                } else {
                    return Err(unknown());
                }
            }
        })
    }
}

fn button(text: impl Into<String>, callback: Callback) -> Button {
    Button::new(text, callback)
}

fn markup(rows: Vec<Vec<Button>>) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: rows,
    }
}

/// Shown after the user sends products.
pub fn confirmation() -> InlineKeyboardMarkup {
    markup(vec![
        vec![button("➕ Добавить продукты", Callback::AddMore)],
        vec![button("👨‍🍳 Готовить (Категории)", Callback::Cook)],
    ])
}

pub fn categories<S: AsRef<str>>(categories: &[S]) -> InlineKeyboardMarkup {
    let mut rows = categories
        .chunks(2)
        .map(|row| {
            row.iter()
                .map(|key| {
                    let key = key.as_ref();
                    button(Category::label_for(key), Callback::Category(key.into()))
                })
                .collect()
        })
        .collect::<Vec<_>>();
    rows.push(vec![button("🗑 Сброс", Callback::Restart)]);
    markup(rows)
}

pub fn dishes(dishes: &[Dish]) -> InlineKeyboardMarkup {
    let mut rows = dishes
        .iter()
        .enumerate()
        .map(|(i, dish)| vec![button(prefix(&dish.name, 40), Callback::Dish(i))])
        .collect::<Vec<_>>();
    rows.push(vec![button(
        "⬅️ Назад к категориям",
        Callback::BackToCategories,
    )]);
    markup(rows)
}

/// The buttons under a recipe.
///
/// A recipe opened from the user's favorites has a `delete_id` and offers deletion instead of photo
/// generation.
pub fn recipe(
    show_save: bool,
    delete_id: Option<&str>,
    dish_name: Option<&str>,
) -> InlineKeyboardMarkup {
    let mut rows = vec![];
    if dish_name.is_some() && delete_id.is_none() {
        rows.push(vec![button("🎨 Сгенерировать фото", Callback::GeneratePhoto)]);
    }
    if show_save {
        rows.push(vec![button("❤️ Сохранить рецепт", Callback::SaveRecipe)]);
    }
    match delete_id {
        Some(id) => {
            rows.push(vec![button(
                "❌ Удалить рецепт",
                Callback::DeleteFavorite(id.into()),
            )]);
            rows.push(vec![button("⬅️ К списку", Callback::FavoritesList)]);
        }
        None => rows.push(vec![button(
            "⬅️ Вернуться к категориям",
            Callback::BackToCategories,
        )]),
    }
    markup(rows)
}

pub fn favorites(favorites: &[Favorite]) -> InlineKeyboardMarkup {
    let mut rows = favorites
        .iter()
        .map(|favorite| {
            vec![button(
                format!("📜 {}", ellipsize(&favorite.dish_name, 35)),
                Callback::ShowFavorite(favorite.recipe_id.clone()),
            )]
        })
        .collect::<Vec<_>>();
    rows.push(vec![button("⬅️ Закрыть", Callback::DeleteMessage)]);
    markup(rows)
}

pub fn hide() -> InlineKeyboardMarkup {
    markup(vec![vec![button("🗑 Скрыть", Callback::DeleteMessage)]])
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Utc;

    fn data(markup: &InlineKeyboardMarkup) -> Vec<Vec<&str>> {
        markup
            .inline_keyboard
            .iter()
            .map(|row| row.iter().map(|b| b.callback_data.as_str()).collect())
            .collect()
    }

    #[test]
    fn test_callback_wire_format() {
        let cases = [
            ("delete_msg", Callback::DeleteMessage),
            ("restart", Callback::Restart),
            ("action_add_more", Callback::AddMore),
            ("action_cook", Callback::Cook),
            ("cat_soup", Callback::Category("soup".into())),
            ("back_to_categories", Callback::BackToCategories),
            ("dish_3", Callback::Dish(3)),
            ("gen_photo", Callback::GeneratePhoto),
            ("save_recipe", Callback::SaveRecipe),
            ("my_recipes_list", Callback::FavoritesList),
            ("fav_abc-1", Callback::ShowFavorite("abc-1".into())),
            ("delete_fav_abc-1", Callback::DeleteFavorite("abc-1".into())),
        ];
        for (wire, callback) in cases {
            assert_eq!(wire.parse::<Callback>().unwrap(), callback);
            assert_eq!(callback.to_string(), wire);
        }
    }

    #[test]
    fn test_unknown_callback() {
        assert!("dish_x".parse::<Callback>().is_err());
        assert!("bogus".parse::<Callback>().is_err());
        assert!("".parse::<Callback>().is_err());
    }

    #[test]
    fn test_categories_layout() {
        let kb = categories(&["soup", "main", "salad"]);
        assert_eq!(
            data(&kb),
            [vec!["cat_soup", "cat_main"], vec!["cat_salad"], vec!["restart"]]
        );
        assert_eq!(kb.inline_keyboard[0][0].text, "🍲 Супы");

        let kb = categories(&["brunch"]);
        assert_eq!(kb.inline_keyboard[0][0].text, "Brunch");
    }

    #[test]
    fn test_dishes_layout() {
        let long = "Очень длинное название блюда, которое не влезает в кнопку целиком";
        let kb = dishes(&[
            Dish {
                name: "Борщ".into(),
                desc: String::new(),
            },
            Dish {
                name: long.into(),
                desc: String::new(),
            },
        ]);
        assert_eq!(
            data(&kb),
            [vec!["dish_0"], vec!["dish_1"], vec!["back_to_categories"]]
        );
        assert_eq!(kb.inline_keyboard[1][0].text.chars().count(), 40);
    }

    #[test]
    fn test_recipe_variants() {
        assert_eq!(
            data(&recipe(true, None, Some("Борщ"))),
            [vec!["gen_photo"], vec!["save_recipe"], vec!["back_to_categories"]]
        );
        assert_eq!(
            data(&recipe(false, None, Some("Борщ"))),
            [vec!["gen_photo"], vec!["back_to_categories"]]
        );
        assert_eq!(
            data(&recipe(false, Some("id1"), Some("Борщ"))),
            [vec!["delete_fav_id1"], vec!["my_recipes_list"]]
        );
        assert_eq!(
            data(&recipe(true, None, None)),
            [vec!["save_recipe"], vec!["back_to_categories"]]
        );
    }

    #[test]
    fn test_favorites_layout() {
        let favorite = |id: &str, name: &str| Favorite {
            recipe_id: id.into(),
            user_id: 1,
            dish_name: name.into(),
            recipe_text: String::new(),
            products_snapshot: String::new(),
            image_base64: None,
            created_at: Utc::now(),
        };
        let kb = favorites(&[
            favorite("a", "Омлет"),
            favorite("b", "Запеканка из творога с изюмом и курагой"),
        ]);
        assert_eq!(data(&kb), [vec!["fav_a"], vec!["fav_b"], vec!["delete_msg"]]);
        assert_eq!(kb.inline_keyboard[0][0].text, "📜 Омлет");
        assert!(kb.inline_keyboard[1][0].text.ends_with("..."));
        assert_eq!(data(&hide()), [vec!["delete_msg"]]);
    }
}
