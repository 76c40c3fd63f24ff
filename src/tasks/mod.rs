mod reaper;

pub use reaper::ReaperTask;
