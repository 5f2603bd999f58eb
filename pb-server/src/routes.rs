use pb_api::v1::*;
use pb_core::net;
use pb_core::signal::ReadySignal;
use rocket::State;
use rocket::http::Status;
use rocket::request::{
    FromRequest,
    Outcome,
    Request,
};
use rocket::serde::json::Json;
use tracing::*;

use crate::service::FrontendService;

/// The calling silo's address, as the creator needs it: first
/// `X-Forwarded-For` element, else the peer address, with loopback mapped
/// to the configured testing host.
pub struct SiloIp(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SiloIp {
    type Error = std::convert::Infallible;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let testing_host = req
            .rocket()
            .state::<FrontendService>()
            .map(|svc| svc.config().testing_host.clone())
            .unwrap_or_default();
        let forwarded = req.headers().get_one("X-Forwarded-For");
        let peer = req.remote().map(|addr| addr.to_string()).unwrap_or_default();

        Outcome::Success(SiloIp(net::remote_ip(forwarded, &peer, &testing_host)))
    }
}

// Every endpoint answers 200 with a real body or 400 with the
// default-valued body; processing errors never leak details to the silo.
fn bad_request<T: Default>(endpoint: &str, err: anyhow::Error) -> (Status, Json<T>) {
    info!("{endpoint} request failed: {err:#}");
    (Status::BadRequest, Json(T::default()))
}

#[rocket::post("/get_pods", data = "<req>")]
pub async fn get_pods(
    req: Json<GetPodsRequest>,
    service: &State<FrontendService>,
) -> (Status, Json<Vec<PodInfo>>) {
    match service.get_pods(&req.user_id).await {
        Ok(infos) => (Status::Ok, Json(infos)),
        Err(err) => bad_request("get_pods", err),
    }
}

#[rocket::post("/create_pod", data = "<req>")]
pub async fn create_pod(
    req: Json<CreatePodRequest>,
    service: &State<FrontendService>,
    silo: SiloIp,
) -> (Status, Json<CreatePodResponse>) {
    match service.create_pod(&req.yaml_url, &req.user_id, &silo.0, &req.settings).await {
        Ok(pod_name) => (Status::Ok, Json(CreatePodResponse { pod_name })),
        Err(err) => bad_request("create_pod", err),
    }
}

#[rocket::post("/watch_create_pod", data = "<req>")]
pub async fn watch_create_pod(
    req: Json<WatchCreatePodRequest>,
    service: &State<FrontendService>,
) -> (Status, Json<WatchCreatePodResponse>) {
    match service.watch_create_pod(&req.user_id, &req.pod_name).await {
        Ok(ready) => (Status::Ok, Json(WatchCreatePodResponse { ready })),
        Err(err) => bad_request("watch_create_pod", err),
    }
}

#[rocket::post("/delete_pod", data = "<req>")]
pub async fn delete_pod(
    req: Json<DeletePodRequest>,
    service: &State<FrontendService>,
) -> (Status, Json<DeletePodResponse>) {
    match service.delete_pod(&req.user_id, &req.pod_name).await {
        Ok(()) => (Status::Ok, Json(DeletePodResponse { requested: true })),
        Err(err) => bad_request("delete_pod", err),
    }
}

#[rocket::post("/watch_delete_pod", data = "<req>")]
pub async fn watch_delete_pod(
    req: Json<WatchDeletePodRequest>,
    service: &State<FrontendService>,
) -> (Status, Json<WatchDeletePodResponse>) {
    match service.watch_delete_pod(&req.user_id, &req.pod_name).await {
        Ok(deleted) => (Status::Ok, Json(WatchDeletePodResponse { deleted })),
        Err(err) => bad_request("watch_delete_pod", err),
    }
}

#[rocket::post("/delete_all_user", data = "<req>")]
pub async fn delete_all_user(
    req: Json<DeleteAllUserRequest>,
    service: &State<FrontendService>,
) -> (Status, Json<DeleteAllUserResponse>) {
    let finished = ReadySignal::with_timeout(service.config().timeout_delete);
    match service.delete_all_user_pods(&req.user_id, finished.clone()).await {
        Ok(()) => {
            let deleted = finished.wait().await;
            (Status::Ok, Json(DeleteAllUserResponse { deleted }))
        },
        Err(err) => bad_request("delete_all_user", err),
    }
}
