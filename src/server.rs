use crate::runner::Pipeline;
use log::error;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::reply::WithStatus;
use warp::{Filter, Rejection, Reply};

/// `GET /` runs the pipeline; `GET /_ah/warmup` answers an empty 200.
pub fn routes(
    pipeline: Arc<Pipeline>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let load = warp::path::end()
        .and(warp::get())
        .and(warp::any().map(move || pipeline.clone()))
        .and_then(load_reports);

    let warmup = warp::path!("_ah" / "warmup")
        .and(warp::get())
        .map(warp::reply);

    load.or(warmup)
}

async fn load_reports(pipeline: Arc<Pipeline>) -> Result<WithStatus<String>, Infallible> {
    match pipeline.run().await {
        Ok(summary) => Ok(warp::reply::with_status(summary.to_string(), StatusCode::OK)),
        Err(err) => {
            error!("pipeline failed: {} (cause: {})", err, err.root());
            Ok(warp::reply::with_status(
                "Internal Server Error".to_string(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ))
        }
    }
}
