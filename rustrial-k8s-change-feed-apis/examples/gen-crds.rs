use kube::CustomResourceExt;
use rustrial_k8s_change_feed_apis::Component;
use serde_yaml;

pub fn main() {
    println!("{}", serde_yaml::to_string(&Component::crd()).unwrap());
}
