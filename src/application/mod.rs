// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Coordinates the other layers to train one experiment.
//
// Rules for this layer:
//   - No ML math or model code here
//   - No argument parsing here (that's Layer 1)
//   - File formats belong to Layer 4 and 6
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// Immutable run configuration and the optional settings file
pub mod config;

// Epoch / step state machine
pub mod orchestrator;

// Wires data, model, optimizer and orchestrator together
pub mod train_use_case;
