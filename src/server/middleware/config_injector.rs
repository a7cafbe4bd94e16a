//! Configuration envelope injector
//!
//! Parses the `x-idk-config` header into a [`RequestConfig`] and stores
//! it in the request extensions for handlers to pick up. A malformed
//! envelope is rejected with 400 before any handler runs. Requests
//! without the header pass through untouched; handlers then look for a
//! body-embedded `idk_config` field instead.

use actix_web::body::EitherBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready};
use actix_web::{HttpMessage, HttpResponse};
use futures::future::{Ready, ready};
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use tracing::warn;

use crate::core::types::RequestConfig;

pub const CONFIG_HEADER: &str = "x-idk-config";

/// Injects the parsed control envelope into request extensions
pub struct ConfigInjectorMiddleware;

impl<S, B> Transform<S, ServiceRequest> for ConfigInjectorMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type InitError = ();
    type Transform = ConfigInjectorService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ConfigInjectorService { service }))
    }
}

pub struct ConfigInjectorService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for ConfigInjectorService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if let Some(raw) = req.headers().get(CONFIG_HEADER) {
            let parsed = raw
                .to_str()
                .map_err(|e| e.to_string())
                .and_then(|text| {
                    serde_json::from_str::<RequestConfig>(text).map_err(|e| e.to_string())
                });

            match parsed {
                Ok(config) => {
                    req.extensions_mut().insert(config);
                }
                Err(error) => {
                    warn!(%error, "rejecting malformed {CONFIG_HEADER} header");
                    let response = HttpResponse::BadRequest().json(json!({
                        "error": {
                            "message": format!("invalid {CONFIG_HEADER} header: {error}"),
                            "type": "invalid_request_error",
                        }
                    }));
                    let (request, _) = req.into_parts();
                    let response = ServiceResponse::new(request, response.map_into_right_body());
                    return Box::pin(async move { Ok(response) });
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_left_body())
        })
    }
}
