pub mod clock;
pub mod vec2;
pub mod vec3;
