pub mod add;
pub mod init;
pub mod master;
pub mod preview;
pub mod reels;
pub mod reference;
pub mod serve;
pub mod status;
