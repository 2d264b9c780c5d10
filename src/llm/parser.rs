//! Tool schemas offered to the planner and the parsing of tool calls back
//! into [`StepPlan`]s.

use serde_json::{json, Value};

use super::StepPlan;

/// The closed set of actions the planner may return via tool calling.
pub fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "type": "function",
            "function": {
                "name": "click",
                "description": "Кликнуть по элементу на странице. Используй когда нужно нажать на кнопку, ссылку или другой интерактивный элемент.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "selector": {
                            "type": "string",
                            "description": "CSS селектор элемента для клика (например: '#button', '.link', 'button[type=submit]')"
                        },
                        "reasoning": {
                            "type": "string",
                            "description": "Объяснение почему нужно кликнуть именно по этому элементу"
                        }
                    },
                    "required": ["selector", "reasoning"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "type",
                "description": "Ввести текст в поле ввода. Используй для заполнения форм, поисковых запросов и т.д.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "selector": {
                            "type": "string",
                            "description": "CSS селектор поля ввода (например: '#search-input', 'input[name=email]')"
                        },
                        "value": {
                            "type": "string",
                            "description": "Текст для ввода"
                        },
                        "reasoning": {
                            "type": "string",
                            "description": "Объяснение что и зачем вводится"
                        }
                    },
                    "required": ["selector", "value", "reasoning"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "navigate",
                "description": "Перейти на указанный URL. Используй для открытия новой страницы или перехода по ссылке.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "url": {
                            "type": "string",
                            "description": "URL для перехода (например: 'https://example.com' или относительный путь '/page')"
                        },
                        "reasoning": {
                            "type": "string",
                            "description": "Объяснение зачем нужен переход на эту страницу"
                        }
                    },
                    "required": ["url", "reasoning"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "extract_info",
                "description": "Извлечь информацию со страницы. Используй когда нужно получить текст, данные или другую информацию с текущей страницы.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "selector": {
                            "type": "string",
                            "description": "CSS селектор элемента для извлечения информации (например: '.price', '#title', 'article')"
                        },
                        "reasoning": {
                            "type": "string",
                            "description": "Объяснение какую информацию нужно извлечь и зачем"
                        }
                    },
                    "required": ["selector", "reasoning"]
                }
            }
        }),
        json!({
            "type": "function",
            "function": {
                "name": "ask_user",
                "description": "Спросить пользователя. Используй когда нужна дополнительная информация от пользователя для продолжения выполнения задачи.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "question": {
                            "type": "string",
                            "description": "Вопрос для пользователя"
                        },
                        "reasoning": {
                            "type": "string",
                            "description": "Объяснение почему нужна эта информация"
                        }
                    },
                    "required": ["question", "reasoning"]
                }
            }
        }),
    ]
}

/// Convert a chat-completions tool call into a plan. `url` and `question`
/// both land in `value` so the executor has a single slot to read.
pub fn parse_tool_call(name: &str, arguments: &str) -> StepPlan {
    let mut plan = StepPlan {
        action: name.to_string(),
        ..Default::default()
    };

    let args: Value = match serde_json::from_str(arguments) {
        Ok(v) => v,
        Err(e) => {
            plan.reasoning = format!("failed to parse tool arguments: {}", e);
            return plan;
        }
    };

    if let Some(v) = args.get("selector").and_then(Value::as_str) {
        plan.selector = v.to_string();
    }
    if let Some(v) = args.get("value").and_then(Value::as_str) {
        plan.value = v.to_string();
    }
    if let Some(v) = args.get("url").and_then(Value::as_str) {
        plan.value = v.to_string();
    }
    if let Some(v) = args.get("question").and_then(Value::as_str) {
        plan.value = v.to_string();
    }
    if let Some(v) = args.get("reasoning").and_then(Value::as_str) {
        plan.reasoning = v.to_string();
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_tools_are_offered() {
        let tools = tool_definitions();
        let names: Vec<&str> = tools
            .iter()
            .map(|t| t["function"]["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["click", "type", "navigate", "extract_info", "ask_user"]);
    }

    #[test]
    fn click_call_is_parsed() {
        let plan = parse_tool_call(
            "click",
            r##"{"selector": "#submit", "reasoning": "send the form"}"##,
        );
        assert_eq!(plan.action, "click");
        assert_eq!(plan.selector, "#submit");
        assert_eq!(plan.reasoning, "send the form");
    }

    #[test]
    fn url_and_question_land_in_value() {
        let nav = parse_tool_call(
            "navigate",
            r#"{"url": "https://example.com", "reasoning": "start"}"#,
        );
        assert_eq!(nav.value, "https://example.com");

        let ask = parse_tool_call(
            "ask_user",
            r#"{"question": "which account?", "reasoning": "ambiguous"}"#,
        );
        assert_eq!(ask.value, "which account?");
    }

    #[test]
    fn malformed_arguments_do_not_panic() {
        let plan = parse_tool_call("click", "not json");
        assert_eq!(plan.action, "click");
        assert!(plan.reasoning.contains("failed to parse"));
        assert!(plan.selector.is_empty());
    }
}
