pub mod cluster;
pub mod util;
pub mod test_util;
