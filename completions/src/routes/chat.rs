use actix_web::{HttpResponse, http::header, post, web};
use api_keys::GatewayContext;
use common::error::Res;

use crate::{dtos::chat::ChatCompletionRequest, provider::ChatProvider, service};

/// OpenAI-compatible chat completion, streamed as server-sent events when
/// `stream` is set.
///
/// # Arguments
///
/// * `ctx` - Key and usage reporter resolved by the gateway.
/// * `provider` - The upstream chat model.
/// * `req` - Messages and sampling options.
///
/// # Returns
///
/// A `Result` containing the completion or the event stream, or an
/// `AppError` for invalid input and upstream failures.
#[post("/completions")]
pub async fn post_chat_completions(
    ctx: web::ReqData<GatewayContext>,
    provider: web::Data<dyn ChatProvider>,
    req: web::Json<ChatCompletionRequest>,
) -> Res<HttpResponse> {
    let ctx = ctx.into_inner();
    let chat = service::chat::prepare(req.into_inner())?;

    log::debug!(
        "Key {} requested {} (stream {})",
        ctx.key.token_prefix,
        chat.request.model,
        chat.stream
    );

    if chat.stream {
        let events = service::chat::stream(provider.get_ref(), ctx.usage, chat).await?;
        return Ok(HttpResponse::Ok()
            .content_type("text/event-stream")
            .insert_header((header::CACHE_CONTROL, "no-cache"))
            .streaming(events));
    }

    let completion = service::chat::complete(provider.get_ref(), ctx.usage.as_ref(), chat).await?;
    Ok(HttpResponse::Ok().json(completion))
}
