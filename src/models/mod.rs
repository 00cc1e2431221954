// src/models/mod.rs
pub mod character;
pub mod user;
pub mod world;

pub use character::{
    CanCreateResponse, Character, CreateCreationRequest, CreateLoreRequest, CreationIntent,
    IntentStatus, LoreEntry, RenameCreationRequest, WaterResponse,
};
pub use user::{
    ApiResponse, AuthResponse, ChangePasswordRequest, LoginRequest, Session, SignupRequest, User,
    UserInfo, WalletVerifyRequest,
};
pub use world::{
    EventsQuery, Milestone, RealtimeEvent, SetSeasonRequest, WorldEventRow, WorldState,
};
