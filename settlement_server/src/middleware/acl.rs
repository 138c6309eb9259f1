//! Access control middleware for the settlement server.
//!
//! Validates the request's bearer token and checks the claims against the roles the route
//! requires. A valid token missing a required role gets 403; a missing or invalid token gets 401.
//! `SuperAdmin` passes every role check.

use std::{pin::Pin, rc::Rc};

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures::{
    future::{ok, Ready},
    Future,
};
use settlement_engine::db_types::Role;

use crate::{auth::claims_from_request, errors::ServerError};

pub struct AclMiddlewareFactory {
    required_roles: Vec<Role>,
}

impl AclMiddlewareFactory {
    pub fn new(required_roles: &[Role]) -> Self {
        AclMiddlewareFactory { required_roles: required_roles.to_vec() }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AclMiddlewareFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;
    type InitError = ();
    type Response = ServiceResponse<B>;
    type Transform = AclMiddlewareService<S>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AclMiddlewareService { required_roles: self.required_roles.clone(), service: Rc::new(service) })
    }
}

pub struct AclMiddlewareService<S> {
    required_roles: Vec<Role>,
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for AclMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;
    type Response = ServiceResponse<B>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let required_roles = self.required_roles.clone();
        Box::pin(async move {
            let claims = claims_from_request(req.request()).map_err(|e| {
                log::debug!("💻️ Rejected request to {}: {e}", req.path());
                Error::from(ServerError::from(e))
            })?;
            let authorized = claims.roles.contains(&Role::SuperAdmin)
                || required_roles.iter().all(|role| claims.roles.contains(role));
            if authorized {
                service.call(req).await
            } else {
                log::warn!("💻️ {} lacks the roles required for {}", claims.sub, req.path());
                Err(Error::from(ServerError::InsufficientPermissions(format!(
                    "This endpoint requires the roles: {}",
                    required_roles.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
                ))))
            }
        })
    }
}
