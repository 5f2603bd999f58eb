mod creator_test;

use pb_testutils::*;

use super::creator::*;
use super::service::*;
