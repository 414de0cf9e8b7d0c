// Copyright 2024 Cornell University
// released under MIT License

pub mod golang;
