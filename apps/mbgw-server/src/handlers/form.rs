//! 协议插件表单
//!
//! - GET /api/v1/form/config?device_type=&form_type=&protocol_type=

use api_contract::FormQuery;
use axum::{
    extract::{Query, State, rejection::QueryRejection},
    response::Response,
};

use crate::AppState;
use crate::utils::response::{bad_request, ok_data};

pub async fn get_form(
    State(state): State<AppState>,
    query: Result<Query<FormQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    match state.forms.lookup(&query) {
        Ok(form) => ok_data(form.cloned()),
        Err(message) => bad_request(message),
    }
}
