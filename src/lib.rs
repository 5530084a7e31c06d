pub mod analyzer;
pub mod config;
pub mod pipeline;
pub mod resolver;
pub mod store;

/// Application name for XDG paths
pub const APP_NAME: &str = "cratedig";

/// Playlists collected when neither CLI args nor the config file name any.
pub const DEFAULT_PLAYLISTS: &[&str] = &[
    "https://soundcloud.com/electronicfuture/sets/deep-house-chillout-2024",
    "https://soundcloud.com/soundcloud-the-peak/sets/on-the-up-new-edm-hits",
    "https://soundcloud.com/luk_music/sets/ibiza-techno-afro-house-remixes-2024-summer-mix",
    "https://soundcloud.com/electronic-dance-dj-party/sets/vocal-chill-deep-house-top-pop-electronic-dance-music-edm-club-remix-party-dj-mix-set-2019-2020",
    "https://soundcloud.com/vocaltrance4ever/sets/best-vocal-trance-songs",
    "https://soundcloud.com/namir-wattar/sets/remix-of-popular-songs-edm",
    "https://soundcloud.com/david-murphy-26/sets/club-mix-2023-dance-music",
    "https://soundcloud.com/martin-heinrich-566502433/sets/club-mix-2024-dance-music",
    "https://soundcloud.com/soundcloud-the-peak/sets/level-up-edm-next",
];
