pub mod calendar;
pub mod standings;
pub mod tabs;
