mod pod_info;
mod requests;

pub use pod_info::PodInfo;
pub use requests::{
    CreatePodRequest,
    CreatePodResponse,
    DeleteAllUserRequest,
    DeleteAllUserResponse,
    DeletePodRequest,
    DeletePodResponse,
    GetPodsRequest,
    WatchCreatePodRequest,
    WatchCreatePodResponse,
    WatchDeletePodRequest,
    WatchDeletePodResponse,
};
