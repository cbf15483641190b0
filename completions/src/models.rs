use serde_json::{Value, json};

pub const DEFAULT_MODEL: &str = "grok-4-0709";
pub const VISION_MODEL: &str = "grok-vision-beta";

/// Unknown or missing model names fall back to the default model.
pub fn resolve(requested: Option<&str>) -> &'static str {
    match requested {
        Some(VISION_MODEL) => VISION_MODEL,
        _ => DEFAULT_MODEL,
    }
}

/// Model catalogue in the OpenAI `list` shape.
pub fn catalogue() -> Value {
    json!({
        "object": "list",
        "data": [
            {
                "id": DEFAULT_MODEL,
                "object": "model",
                "created": 1720483200,
                "owned_by": "xai",
                "permission": [],
                "root": DEFAULT_MODEL,
                "parent": null,
                "description": "Grok 4, xAI's flagship model with enhanced reasoning and real-time knowledge",
                "context_length": 131072,
                "capabilities": ["text", "reasoning", "real-time", "thinking"],
                "version": "4.0",
                "release_date": "2025-07-09"
            },
            {
                "id": VISION_MODEL,
                "object": "model",
                "created": 1699200000,
                "owned_by": "xai",
                "permission": [],
                "root": VISION_MODEL,
                "parent": null,
                "description": "Grok with image understanding",
                "context_length": 131072,
                "capabilities": ["text", "vision", "reasoning", "real-time"],
                "version": "beta"
            }
        ]
    })
}
