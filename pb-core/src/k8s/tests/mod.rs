mod client_test;
mod managed_pod_test;

use pb_testutils::*;

use super::*;
use crate::prelude::*;
