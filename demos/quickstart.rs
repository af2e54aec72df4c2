//! Quickstart example showing sample-weighted averaging

use ndarray::array;
use fedsim::{fedavg, ModelState};

fn state(weight: [f32; 3], bias: f32) -> ModelState {
    let mut s = ModelState::new();
    s.insert("linear.weight", array![weight[0], weight[1], weight[2]].into_dyn());
    s.insert("linear.bias", array![bias].into_dyn());
    s
}

fn main() {
    println!("fedsim Quickstart Demo\n");

    // Three clients trained on 10, 30 and 60 local examples
    let small = state([1.0, 2.0, 3.0], 0.0);
    let medium = state([2.0, 2.0, 2.0], 1.0);
    let large = state([4.0, 0.0, 1.0], 2.0);

    println!("Averaging 3 client updates weighted by sample count...\n");
    let global = fedavg(&[(&small, 10), (&medium, 30), (&large, 60)]).unwrap();

    for (name, tensor) in global.iter() {
        println!("   {:<14} {}", name, tensor);
    }
    println!("\nExpected linear.weight: [3.1, 0.8, 1.5], linear.bias: [1.5]");
}
