//! Arithmetic tool.
//!
//! Double-precision arithmetic with textual results so the model can
//! read them back. Domain errors (division by zero, negative square
//! root) are answers, not tool failures.

use async_trait::async_trait;
use serde_json::Value;

use super::{Tool, require_f64, require_str, status};
use crate::error::{AssistantError, Result};
use crate::session::Session;

/// Performs a named arithmetic operation on one or two numbers.
pub struct PerformMathOperation;

#[async_trait]
impl Tool for PerformMathOperation {
    fn name(&self) -> &str {
        "perform_math_operation"
    }

    fn description(&self) -> &str {
        "Perform a math operation on one or two numbers"
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "description": "One of: \"addition\", \"subtraction\", \"multiplication\", \"division\", \"power\", \"square_root\"."
                },
                "number1": {
                    "type": "number",
                    "description": "The first operand (the only operand for square_root)."
                },
                "number2": {
                    "type": "number",
                    "description": "The second operand. Not used for square_root."
                }
            },
            "required": ["operation", "number1"]
        })
    }

    async fn execute(&self, params: &Value, session: &Session) -> Result<Value> {
        status(session, "Calculating!").await;

        let operation = require_str(params, "operation")?;
        let number1 = require_f64(params, "number1")?;

        let answer = |text: String| Ok(serde_json::json!({"text": text}));

        let result = match operation {
            "addition" => number1 + second(params)?,
            "subtraction" => number1 - second(params)?,
            "multiplication" => number1 * second(params)?,
            "division" => {
                let number2 = second(params)?;
                if number2 == 0.0 {
                    return answer("Division by zero is undefined.".to_owned());
                }
                number1 / number2
            }
            "power" => number1.powf(second(params)?),
            "square_root" => {
                if number1 < 0.0 {
                    return answer(
                        "Square root of a negative number is undefined in real numbers."
                            .to_owned(),
                    );
                }
                number1.sqrt()
            }
            other => {
                return answer(format!("Operation '{other}' is not supported."));
            }
        };

        answer(format!("Result of {operation}: {result}"))
    }
}

/// The second operand; binary operations require it.
fn second(params: &Value) -> Result<f64> {
    if params.get("number2").is_none_or(Value::is_null) {
        return Err(AssistantError::Tool(
            "this operation requires 'number2'".to_owned(),
        ));
    }
    require_f64(params, "number2")
}
