use actix_cors::Cors;
use actix_web::http::header::{self, HeaderName};
use limiter::headers;

pub fn middleware(origin: &str) -> Cors {
    Cors::default()
        .allowed_methods(vec!["GET", "POST", "PATCH", "DELETE", "OPTIONS"])
        .allowed_headers(vec![header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allowed_origin(origin)
        .expose_headers(
            [
                headers::LIMIT_REQUESTS,
                headers::REMAINING_REQUESTS,
                headers::RESET_REQUESTS,
                headers::LIMIT_TOKENS,
                headers::REMAINING_TOKENS,
            ]
            .map(HeaderName::from_static),
        )
        .max_age(3600)
}
