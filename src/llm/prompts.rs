//! Task-category detection and the system prompts handed to the planner.
//!
//! With the reasoning layer in place the prompts stay minimal: analysis and
//! strategy come from the reasoning phase, so the planner prompt only names
//! the available actions. The mailbox category is the one exception — it
//! carries detailed extraction strategies because mail UIs are hostile to
//! generic selectors.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskCategory {
    Navigation,
    Form,
    Email,
    Extraction,
    Purchase,
    General,
}

/// Keyword scan over the task text. Email is checked before extraction:
/// "прочитай письма" is a mail task, not a generic read.
pub fn detect_task_category(task: &str) -> TaskCategory {
    let task_lower = task.to_lowercase();
    let contains_any = |keywords: &[&str]| keywords.iter().any(|kw| task_lower.contains(kw));

    if contains_any(&[
        "открой",
        "перейди",
        "найди страницу",
        "navigate",
        "go to",
        "open",
        "visit",
    ]) {
        return TaskCategory::Navigation;
    }

    if contains_any(&[
        "заполни",
        "введи",
        "отправь форму",
        "зарегистрируйся",
        "войди",
        "fill",
        "submit",
        "login",
        "register",
    ]) {
        return TaskCategory::Form;
    }

    if contains_any(&[
        "почта",
        "письма",
        "письмо",
        "спам",
        "email",
        "mail",
        "inbox",
        "яндекс почта",
        "gmail",
    ]) {
        return TaskCategory::Email;
    }

    if contains_any(&[
        "найди",
        "извлеки",
        "получи информацию",
        "скопируй",
        "прочитай",
        "find",
        "extract",
        "get",
        "read",
    ]) {
        return TaskCategory::Extraction;
    }

    if contains_any(&[
        "купи",
        "оплати",
        "закажи",
        "добавь в корзину",
        "buy",
        "purchase",
        "order",
        "checkout",
        "cart",
    ]) {
        return TaskCategory::Purchase;
    }

    TaskCategory::General
}

pub fn system_prompt_for_category(category: TaskCategory) -> &'static str {
    if category == TaskCategory::Email {
        return r#"Ты автономный AI-агент для управления браузером, специализирующийся на работе с почтой.

Твоя задача - планировать конкретные действия на основе:
- Текущей задачи пользователя (работа с почтой: чтение, удаление спама)
- Контекста страницы (доступные элементы)
- Стратегии из reasoning (если доступна)

ВАЖНО: ДЕЙСТВУЙ, а не спрашивай! Используй свои знания для определения спама.

Для работы с почтой (Яндекс.Почта, Gmail):
1. Если не на странице почты - перейди на mail.yandex.ru или gmail.com
2. Найди папку "Входящие" или список писем (обычно уже открыта)
3. КРИТИЧНО: Для извлечения информации о письмах:
   - НЕ используй селекторы аватаров - это только иконки!
   - СТРАТЕГИЯ 1: Кликни на первое письмо в списке, чтобы открыть его и увидеть тему, отправителя, содержание
   - СТРАТЕГИЯ 2: Если письма открываются в правой панели, используй extract_info на элементах письма
   - СТРАТЕГИЯ 3: Если видишь список писем в левой панели, ищи элементы с текстом (тема и отправитель видны в списке)
   - СТРАТЕГИЯ 4: Прокрути страницу вниз, чтобы увидеть больше писем
4. Прочитай последние письма (открой каждое, извлеки тему, отправителя, краткое содержание)
5. Определи спам-письма на основе общих признаков:
   - Рекламные рассылки (promo, акции, скидки в теме)
   - Подозрительные отправители (noreply, no-reply, случайные домены)
   - Фишинг (требования паролей, срочные действия)
   - Массовые рассылки от неизвестных отправителей
6. Выбери спам-письма (чекбоксы или клик) и удали их кнопкой "Удалить"
7. Предоставь отчет: сколько спама удалено, какие важные письма остались

КРИТИЧНО: НЕ спрашивай пользователя о критериях спама - используй свои знания и действуй!
Используй ask_user ТОЛЬКО когда действительно невозможно определить.

Доступные действия:
- navigate(url) - переход по URL
- click(selector) - клик по элементу
- type(selector, value) - ввод текста
- extract_info(selector) - извлечение информации со страницы
- ask_user(question) - запрос у пользователя (ИСПОЛЬЗУЙ МИНИМАЛЬНО!)
- complete() - задача выполнена

Используй tool calling для выбора действия.
Отвечай на русском языке."#;
    }

    // Unified minimal prompt for every other category: the reasoning layer
    // supplies analysis and strategy.
    r#"Ты автономный AI-агент для управления браузером.

Твоя задача - планировать конкретные действия на основе:
- Текущей задачи пользователя
- Контекста страницы (доступные элементы)
- Стратегии из reasoning (если доступна)

Доступные действия:
- navigate(url) - переход по URL
- click(selector) - клик по элементу
- type(selector, value) - ввод текста
- extract_info(selector) - извлечение информации
- ask_user(question) - запрос у пользователя
- complete() - задача выполнена

Используй tool calling для выбора действия.
Отвечай на русском языке."#
}
